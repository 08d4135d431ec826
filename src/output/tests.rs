use serde_json::json;

use super::*;
use crate::test_support::{document_with_pages, page_contents};

fn record(value: Value) -> ExtractedRecord {
    match value {
        Value::Object(object) => object,
        other => panic!("fixture must be an object, got {other}"),
    }
}

fn mrn_map(pages: Vec<u32>) -> PageTypeMap {
    let mut map = PageTypeMap::new();
    map.insert(PageType::Mrn, pages);
    map
}

#[test]
fn header_is_sorted_union_of_record_keys() {
    let records = vec![
        record(json!({"packages": 6, "consignment_note": "1"})),
        record(json!({"volume_m3": 6.432, "consignment_note": "2"})),
    ];

    assert_eq!(
        csv_columns(&records),
        vec!["consignment_note", "packages", "volume_m3"]
    );

    let rendered = String::from_utf8(render_csv(&records).expect("render")).expect("utf-8");
    let lines = rendered.lines().collect::<Vec<&str>>();
    assert_eq!(lines[0], "consignment_note,packages,volume_m3");
    assert_eq!(lines[1], "1,6,");
    assert_eq!(lines[2], "2,,6.432");
}

#[test]
fn cells_render_arrays_nulls_and_objects() {
    let records = vec![record(json!({
        "hs_codes": ["85472000", "85389099"],
        "mrn_pages": [2, 3],
        "gross_weight_kg": null,
        "extra": {"k": "v"},
        "flag": true
    }))];

    let rendered = String::from_utf8(render_csv(&records).expect("render")).expect("utf-8");
    let mut reader = csv::Reader::from_reader(rendered.as_bytes());
    let headers = reader.headers().expect("headers").clone();
    let row = reader
        .records()
        .next()
        .expect("one row")
        .expect("valid row");

    let cell = |name: &str| {
        let position = headers
            .iter()
            .position(|header| header == name)
            .expect("column present");
        row[position].to_string()
    };
    assert_eq!(cell("hs_codes"), "85472000; 85389099");
    assert_eq!(cell("mrn_pages"), "2; 3");
    assert_eq!(cell("gross_weight_kg"), "");
    assert_eq!(cell("extra"), r#"{"k":"v"}"#);
    assert_eq!(cell("flag"), "true");
    assert!(!rendered.contains("null"));
}

#[test]
fn zero_records_write_default_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty.csv");

    write_csv(&[], &path).expect("header-only csv");

    let content = fs::read_to_string(&path).expect("read csv");
    assert_eq!(content, format!("{}\n", DEFAULT_COLUMNS.join(",")));
}

#[test]
fn mrn_pdf_copies_selected_pages_verbatim() {
    let document = document_with_pages(&["cover", "mrn one", "terms", "mrn two"]);
    let source_pages = page_contents(document.bytes());

    let bytes = render_mrn_pdf(&document, &[2, 4]).expect("render");
    let copied = page_contents(&bytes);

    assert_eq!(copied.len(), 2);
    assert_eq!(copied[0], source_pages[1]);
    assert_eq!(copied[1], source_pages[3]);
}

#[test]
fn mrn_pdf_page_count_matches_map() {
    let document = document_with_pages(&["a", "b", "c"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fixture_MRN.pdf");

    let written = write_mrn_pdf(&document, &mrn_map(vec![1, 3]), &path)
        .expect("write")
        .expect("pages present");

    let pdf = lopdf::Document::load(&written).expect("load output");
    assert_eq!(pdf.get_pages().len(), 2);
}

#[test]
fn no_mrn_pages_means_no_pdf() {
    let document = document_with_pages(&["a"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fixture_MRN.pdf");

    let written = write_mrn_pdf(&document, &mrn_map(Vec::new()), &path).expect("no error");
    assert_eq!(written, None);
    assert!(!path.exists());

    let written = write_mrn_pdf(&document, &PageTypeMap::new(), &path).expect("no error");
    assert_eq!(written, None);
}

#[test]
fn out_of_range_mrn_page_is_rejected() {
    let document = document_with_pages(&["a", "b"]);
    let error = render_mrn_pdf(&document, &[3]).expect_err("page 3 does not exist");
    assert_eq!(error.kind(), "PageIndexOutOfRange");
}

#[test]
fn staged_outputs_only_appear_on_commit() {
    let document = document_with_pages(&["Consignment note 1", "MRN 25CZ3O000OO1DAGMB8"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = OutputWriter::new(dir.path().join("out")).expect("writer");
    let records = vec![record(json!({"consignment_note": "1", "mrn_pages": [2]}))];

    let staged = writer
        .stage(&document, &records, &mrn_map(vec![2]))
        .expect("stage");
    assert!(!writer.output_dir().join("fixture.csv").exists());
    assert!(!writer.output_dir().join("fixture_MRN.pdf").exists());

    let files = staged.commit().expect("commit");
    assert_eq!(files.csv, writer.output_dir().join("fixture.csv"));
    assert_eq!(
        files.mrn_pdf,
        Some(writer.output_dir().join("fixture_MRN.pdf"))
    );
    assert!(files.csv.exists());

    let leftovers = fs::read_dir(writer.output_dir())
        .expect("list output dir")
        .count();
    assert_eq!(leftovers, 2);
}

#[test]
fn dropped_staging_leaves_nothing_behind() {
    let document = document_with_pages(&["a", "b"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = OutputWriter::new(dir.path()).expect("writer");

    let staged = writer
        .stage(&document, &[], &mrn_map(vec![1]))
        .expect("stage");
    drop(staged);

    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);
}

#[test]
fn commit_without_mrn_pages_removes_stale_copy() {
    let document = document_with_pages(&["a"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = OutputWriter::new(dir.path()).expect("writer");
    let stale = dir.path().join("fixture_MRN.pdf");
    fs::write(&stale, b"old").expect("seed stale file");

    let files = writer
        .stage(&document, &[], &mrn_map(Vec::new()))
        .expect("stage")
        .commit()
        .expect("commit");

    assert_eq!(files.mrn_pdf, None);
    assert!(!stale.exists());
}

#[test]
fn rendering_is_deterministic() {
    let document = document_with_pages(&["a", "b", "c"]);
    let records = vec![record(json!({"consignment_note": "1", "mrn_pages": [2, 3]}))];

    assert_eq!(
        render_csv(&records).expect("first"),
        render_csv(&records).expect("second")
    );
    assert_eq!(
        render_mrn_pdf(&document, &[2, 3]).expect("first"),
        render_mrn_pdf(&document, &[2, 3]).expect("second")
    );
}
