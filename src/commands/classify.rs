use std::io::{self, Write};

use anyhow::{Context, Result};
use mrn_extract::classify::{PageClassification, classify_pages};
use mrn_extract::document::load_file;
use mrn_extract::model::{PageType, PageTypeMap};
use serde::Serialize;
use tracing::info;

use crate::cli::ClassifyArgs;

#[derive(Debug, Serialize)]
struct ClassifyReport {
    document: String,
    page_count: usize,
    pages: Vec<PageReport>,
    page_types: PageTypeMap,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PageReport {
    page: u32,
    types: Vec<PageType>,
}

pub fn run(args: ClassifyArgs) -> Result<()> {
    let document = load_file(&args.input, args.text_backend)?;
    let classification = classify_pages(document.pages());

    info!(
        path = %args.input.display(),
        pages = document.page_count(),
        mrn_pages = classification.mrn_pages.len(),
        "classified pages"
    );

    let report = build_report(
        document.stem(),
        &classification,
        document.warnings().to_vec(),
    );

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    if args.json {
        serde_json::to_writer_pretty(&mut out, &report)
            .context("failed to serialize classification")?;
        writeln!(out)?;
    } else {
        write_text(&mut out, &report)?;
    }
    out.flush()?;

    Ok(())
}

fn build_report(
    document: &str,
    classification: &PageClassification,
    warnings: Vec<String>,
) -> ClassifyReport {
    let pages = classification
        .tags
        .iter()
        .map(|(page, tags)| PageReport {
            page: *page,
            types: tags.iter().copied().collect(),
        })
        .collect::<Vec<_>>();

    ClassifyReport {
        document: document.to_string(),
        page_count: pages.len(),
        pages,
        page_types: classification.to_page_type_map(),
        warnings,
    }
}

fn write_text(out: &mut impl Write, report: &ClassifyReport) -> Result<()> {
    writeln!(out, "{} ({} pages)", report.document, report.page_count)?;
    for page in &report.pages {
        let types = page
            .types
            .iter()
            .map(|page_type| page_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "  page {:>3}: {types}", page.page)?;
    }
    for warning in &report.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use mrn_extract::model::Page;

    use super::*;

    fn pages(texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| Page {
                number: index as u32 + 1,
                text: text.to_string(),
            })
            .collect()
    }

    #[test]
    fn text_report_lists_every_page() {
        let classification = classify_pages(&pages(&[
            "CONSIGNMENT NOTE 40846302",
            "MRN 25CZ3O000OO1DAGMB8",
            "",
        ]));
        let report = build_report("shipment", &classification, Vec::new());

        let mut rendered = Vec::new();
        write_text(&mut rendered, &report).expect("render");
        let rendered = String::from_utf8(rendered).expect("utf8");

        assert_eq!(
            rendered,
            "shipment (3 pages)\n  page   1: Consignment Note\n  page   2: MRN\n  page   3: Unclassified\n"
        );
    }

    #[test]
    fn json_report_uses_page_type_names() {
        let classification = classify_pages(&pages(&["MRN 25CZ3O000OO1DAGMB8"]));
        let report = build_report("single", &classification, vec!["no text".to_string()]);

        let value = serde_json::to_value(&report).expect("serialize");

        assert_eq!(value["pages"][0]["types"], serde_json::json!(["MRN"]));
        assert_eq!(value["page_types"]["MRN"], serde_json::json!([1]));
        assert_eq!(value["warnings"][0], "no text");
    }
}
