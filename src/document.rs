use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::model::Page;
use crate::util::sha256_bytes;

/// Documents above this size are still processed, with a warning.
pub const LARGE_DOCUMENT_PAGES: usize = 150;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TextBackend {
    #[default]
    Auto,
    Pdftotext,
    Lopdf,
}

impl TextBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pdftotext => "pdftotext",
            Self::Lopdf => "lopdf",
        }
    }
}

/// An immutable, loaded PDF: original bytes plus per-page text.
#[derive(Debug, Clone)]
pub struct Document {
    stem: String,
    bytes: Vec<u8>,
    sha256: String,
    pages: Vec<Page>,
    warnings: Vec<String>,
}

impl Document {
    pub fn from_bytes(
        stem: impl Into<String>,
        bytes: Vec<u8>,
        backend: TextBackend,
    ) -> Result<Self, PipelineError> {
        let stem = stem.into();
        let parsed = lopdf::Document::load_mem(&bytes).map_err(|error| {
            PipelineError::InvalidDocument {
                document_id: stem.clone(),
                reason: error.to_string(),
            }
        })?;
        let page_count = parsed.get_pages().len();
        if page_count == 0 {
            return Err(PipelineError::InvalidDocument {
                document_id: stem,
                reason: "document has no pages".to_string(),
            });
        }
        if page_count > LARGE_DOCUMENT_PAGES {
            warn!(
                document = %stem,
                page_count,
                limit = LARGE_DOCUMENT_PAGES,
                "document exceeds recommended page count"
            );
        }

        let mut warnings = Vec::new();
        let texts = extract_page_texts(&parsed, &bytes, page_count, backend, &mut warnings);
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Page {
                number: (index + 1) as u32,
                text,
            })
            .collect::<Vec<Page>>();

        debug!(document = %stem, page_count, backend = backend.as_str(), "loaded document");

        Ok(Self {
            sha256: sha256_bytes(&bytes),
            stem,
            bytes,
            pages,
            warnings,
        })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn contains_page(&self, page: u32) -> bool {
        page >= 1 && (page as usize) <= self.pages.len()
    }

    /// Non-fatal problems met while extracting page text.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Plain-text rendition sent to the model when the document upload path fails.
    pub fn fallback_text(&self) -> String {
        self.pages
            .iter()
            .filter(|page| !page.text.trim().is_empty())
            .map(|page| format!("--- PAGE {} ---\n{}\n", page.number, page.text))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

fn extract_page_texts(
    parsed: &lopdf::Document,
    bytes: &[u8],
    page_count: usize,
    backend: TextBackend,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let use_pdftotext = match backend {
        TextBackend::Lopdf => false,
        TextBackend::Pdftotext => true,
        TextBackend::Auto => command_available("pdftotext"),
    };

    if use_pdftotext {
        match extract_pages_with_pdftotext(bytes) {
            Ok(pages) if pages.len() == page_count => return pages,
            Ok(pages) => warnings.push(format!(
                "pdftotext produced {} pages for a {}-page document; using lopdf text",
                pages.len(),
                page_count
            )),
            Err(error) => warnings.push(format!("pdftotext failed, using lopdf text: {error:#}")),
        }
    }

    extract_pages_with_lopdf(parsed, warnings)
}

fn extract_pages_with_lopdf(parsed: &lopdf::Document, warnings: &mut Vec<String>) -> Vec<String> {
    parsed
        .get_pages()
        .keys()
        .map(|page_number| match parsed.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(error) => {
                warnings.push(format!(
                    "could not extract text from page {page_number}: {error}"
                ));
                String::new()
            }
        })
        .collect()
}

fn extract_pages_with_pdftotext(bytes: &[u8]) -> Result<Vec<String>> {
    let mut staged = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .context("failed to create temporary PDF for pdftotext")?;
    staged
        .write_all(bytes)
        .context("failed to stage PDF for pdftotext")?;

    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(staged.path())
        .arg("-")
        .output()
        .context("failed to execute pdftotext")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("pdftotext returned non-zero exit status: {}", stderr.trim());
    }

    Ok(split_form_feed_pages(&String::from_utf8_lossy(&output.stdout)))
}

/// pdftotext terminates every page with a form feed; the last chunk is empty.
fn split_form_feed_pages(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect();

    if raw.ends_with('\u{000C}') {
        pages.pop();
    }

    pages
}

fn command_available(command: &str) -> bool {
    Command::new(command)
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Reads a PDF from disk and derives its stem from the file name.
pub fn load_file(path: &Path, backend: TextBackend) -> Result<Document> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

    Document::from_bytes(stem, bytes, backend)
        .with_context(|| format!("failed to load {}", path.display()))
}
