use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One structured shipment entry as returned by the model.
pub type ExtractedRecord = Map<String, Value>;

/// Final page attribution, one ascending deduplicated list per page type.
pub type PageTypeMap = BTreeMap<PageType, Vec<u32>>;

pub const MRN_PAGES_FIELD: &str = "mrn_pages";
pub const CONSIGNMENT_NOTE_FIELD: &str = "consignment_note";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageType {
    #[serde(rename = "Consignment Note")]
    ConsignmentNote,
    #[serde(rename = "MRN")]
    Mrn,
    #[serde(rename = "Unclassified")]
    Unclassified,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConsignmentNote => "Consignment Note",
            Self::Mrn => "MRN",
            Self::Unclassified => "Unclassified",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPath {
    NativeDocument,
    TextFallback,
}

impl ExtractionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NativeDocument => "native_document",
            Self::TextFallback => "text_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub model: String,
    pub path: ExtractionPath,
}

/// Which reconciliation tier attributed MRN pages to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    AiHint,
    Structural,
    EvenSplit,
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAssignment {
    pub record_index: usize,
    pub source: AssignmentSource,
    pub mrn_pages: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFiles {
    pub csv: PathBuf,
    pub mrn_pdf: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub document_id: String,
    pub extraction_id: String,
    pub extracted_data: Vec<ExtractedRecord>,
    pub page_types: PageTypeMap,
    pub output_files: OutputFiles,
    pub usage_info: UsageInfo,
    pub processing_time_seconds: f64,
    pub assignments: Vec<RecordAssignment>,
    pub warnings: Vec<String>,
}

/// What is already known when output writing fails.
#[derive(Debug, Clone, Serialize)]
pub struct PartialResult {
    pub extracted_data: Vec<ExtractedRecord>,
    pub usage_info: UsageInfo,
}

/// Batch totals reported at the end of a CLI session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_files: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    pub total_cost_usd: f64,
    pub total_cost_czk: f64,
    pub total_tokens: u64,
    pub total_processing_time_seconds: f64,
}
