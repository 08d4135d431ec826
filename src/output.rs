use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_COLUMNS;
use crate::document::Document;
use crate::error::PipelineError;
use crate::model::{ExtractedRecord, OutputFiles, PageType, PageTypeMap};

pub const ARRAY_DELIMITER: &str = "; ";

pub fn csv_file_name(stem: &str) -> String {
    format!("{stem}.csv")
}

pub fn mrn_pdf_file_name(stem: &str) -> String {
    format!("{stem}_MRN.pdf")
}

/// Sorted union of record keys; the default prompt columns when there are no records.
pub fn csv_columns(records: &[ExtractedRecord]) -> Vec<String> {
    if records.is_empty() {
        return DEFAULT_COLUMNS.iter().map(|column| column.to_string()).collect();
    }

    records
        .iter()
        .flat_map(|record| record.keys().cloned())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

pub fn render_csv(records: &[ExtractedRecord]) -> io::Result<Vec<u8>> {
    let columns = csv_columns(records);
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(&columns).map_err(io::Error::other)?;
    for record in records {
        writer
            .write_record(columns.iter().map(|column| render_cell(record.get(column))))
            .map_err(io::Error::other)?;
    }

    writer.into_inner().map_err(|error| error.into_error())
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| render_cell(Some(item)))
            .collect::<Vec<String>>()
            .join(ARRAY_DELIMITER),
        Some(other) => other.to_string(),
    }
}

/// Copies the given pages, in ascending order, out of the source PDF.
///
/// Page objects and their content streams are carried over untouched; every
/// other page is deleted from a copy of the object graph and unreachable
/// objects are pruned.
pub fn render_mrn_pdf(document: &Document, mrn_pages: &[u32]) -> Result<Vec<u8>, PipelineError> {
    for page in mrn_pages {
        if !document.contains_page(*page) {
            return Err(PipelineError::PageIndexOutOfRange {
                page: *page,
                page_count: document.page_count(),
                context: "MRN PDF export".to_string(),
            });
        }
    }

    let keep = mrn_pages.iter().copied().collect::<BTreeSet<u32>>();
    let mut pdf = lopdf::Document::load_mem(document.bytes()).map_err(|error| {
        PipelineError::InvalidDocument {
            document_id: document.stem().to_string(),
            reason: error.to_string(),
        }
    })?;

    let discarded = pdf
        .get_pages()
        .keys()
        .copied()
        .filter(|page| !keep.contains(page))
        .collect::<Vec<u32>>();
    pdf.delete_pages(&discarded);
    pdf.prune_objects();

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)
        .map_err(|error| PipelineError::output_write(mrn_pdf_file_name(document.stem()), error))?;

    debug!(
        document = %document.stem(),
        kept = keep.len(),
        discarded = discarded.len(),
        "rendered MRN page copy"
    );
    Ok(bytes)
}

fn mrn_pages(page_types: &PageTypeMap) -> &[u32] {
    page_types
        .get(&PageType::Mrn)
        .map_or(&[][..], |pages| pages.as_slice())
}

/// Writes the CSV export to `path` through a temporary sibling file.
pub fn write_csv(records: &[ExtractedRecord], path: &Path) -> Result<PathBuf, PipelineError> {
    let bytes = render_csv(records).map_err(|error| PipelineError::output_write(path, error))?;
    let staged = stage_bytes(parent_dir(path), &bytes)?;
    persist(staged, path)?;
    Ok(path.to_path_buf())
}

/// Writes the MRN page copy to `path`, or nothing when no page is MRN.
pub fn write_mrn_pdf(
    document: &Document,
    page_types: &PageTypeMap,
    path: &Path,
) -> Result<Option<PathBuf>, PipelineError> {
    let pages = mrn_pages(page_types);
    if pages.is_empty() {
        return Ok(None);
    }

    let bytes = render_mrn_pdf(document, pages)?;
    let staged = stage_bytes(parent_dir(path), &bytes)?;
    persist(staged, path)?;
    Ok(Some(path.to_path_buf()))
}

/// Output location for one document: `{stem}.csv` and `{stem}_MRN.pdf`.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .map_err(|error| PipelineError::output_write(&output_dir, error))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Renders both outputs into temporary files inside the output directory.
    pub fn stage(
        &self,
        document: &Document,
        records: &[ExtractedRecord],
        page_types: &PageTypeMap,
    ) -> Result<StagedOutputs, PipelineError> {
        let csv_path = self.output_dir.join(csv_file_name(document.stem()));
        let csv_bytes =
            render_csv(records).map_err(|error| PipelineError::output_write(&csv_path, error))?;
        let csv = StagedFile {
            temp: stage_bytes(&self.output_dir, &csv_bytes)?,
            destination: csv_path,
        };

        let mrn_pdf_path = self.output_dir.join(mrn_pdf_file_name(document.stem()));
        let pages = mrn_pages(page_types);
        let mrn_pdf = if pages.is_empty() {
            None
        } else {
            let pdf_bytes = render_mrn_pdf(document, pages)?;
            Some(StagedFile {
                temp: stage_bytes(&self.output_dir, &pdf_bytes)?,
                destination: mrn_pdf_path.clone(),
            })
        };

        Ok(StagedOutputs {
            csv,
            mrn_pdf,
            mrn_pdf_path,
        })
    }
}

#[derive(Debug)]
struct StagedFile {
    temp: NamedTempFile,
    destination: PathBuf,
}

/// Fully written outputs waiting to be moved into place.
///
/// Dropping without `commit` removes the temporary files.
#[derive(Debug)]
pub struct StagedOutputs {
    csv: StagedFile,
    mrn_pdf: Option<StagedFile>,
    mrn_pdf_path: PathBuf,
}

impl StagedOutputs {
    pub fn commit(self) -> Result<OutputFiles, PipelineError> {
        let csv_path = self.csv.destination.clone();
        persist(self.csv.temp, &csv_path)?;

        let mrn_pdf = match self.mrn_pdf {
            Some(staged) => {
                if let Err(error) = persist(staged.temp, &staged.destination) {
                    remove_quietly(&csv_path);
                    return Err(error);
                }
                Some(staged.destination)
            }
            None => {
                // A copy left by an earlier run would no longer match this result.
                if self.mrn_pdf_path.exists() {
                    remove_quietly(&self.mrn_pdf_path);
                }
                None
            }
        };

        info!(
            csv = %csv_path.display(),
            mrn_pdf = mrn_pdf.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
            "committed outputs"
        );

        Ok(OutputFiles {
            csv: csv_path,
            mrn_pdf,
        })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn stage_bytes(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, PipelineError> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|error| PipelineError::output_write(dir, error))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|error| PipelineError::output_write(temp.path(), error))?;
    Ok(temp)
}

fn persist(temp: NamedTempFile, destination: &Path) -> Result<(), PipelineError> {
    temp.persist(destination)
        .map(|_| ())
        .map_err(|error| PipelineError::output_write(destination, error.error))
}

fn remove_quietly(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %error, "failed to remove output file");
    }
}

#[cfg(test)]
mod tests;
