use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::model::{ExtractionPath, OutputFiles, SessionSummary};
use crate::util::{ensure_directory, now_utc_string, round_to};

pub const DEFAULT_LOG_FILE: &str = "logs/extraction_log.jsonl";

/// One line of the JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    ExtractionStart(StartEvent),
    ExtractionSuccess(SuccessEvent),
    ExtractionError(ErrorEvent),
    SessionSummary(SummaryEvent),
}

impl LogEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractionStart(_) => "extraction_start",
            Self::ExtractionSuccess(_) => "extraction_success",
            Self::ExtractionError(_) => "extraction_error",
            Self::SessionSummary(_) => "session_summary",
        }
    }

    pub fn extraction_id(&self) -> Option<&str> {
        match self {
            Self::ExtractionStart(event) => Some(&event.extraction_id),
            Self::ExtractionSuccess(event) => Some(&event.extraction_id),
            Self::ExtractionError(event) => Some(&event.extraction_id),
            Self::SessionSummary(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartEvent {
    pub extraction_id: String,
    pub pdf_filename: String,
    pub document_sha256: String,
    pub model: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEvent {
    pub extraction_id: String,
    pub pdf_filename: String,
    pub document_sha256: String,
    pub processing_time_seconds: f64,
    pub cost: CostEntry,
    pub tokens: TokenEntry,
    pub model: String,
    pub extraction_path: ExtractionPath,
    pub extracted_records_count: usize,
    pub output_files: OutputFiles,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub extraction_id: String,
    pub pdf_filename: String,
    #[serde(default)]
    pub document_sha256: Option<String>,
    pub processing_time_seconds: f64,
    pub error: ErrorEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub summary: SessionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub usd: f64,
    pub czk: f64,
}

impl CostEntry {
    pub fn from_usd(usd: f64, czk_per_usd: f64) -> Self {
        Self {
            usd: round_to(usd, 6),
            czk: round_to(usd * czk_per_usd, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub kind: String,
    pub message: String,
}

/// Append-only JSONL side channel.
///
/// Write failures are reported through `tracing` and never returned.
#[derive(Debug, Clone, Default)]
pub struct ExtractionLogger {
    path: Option<PathBuf>,
}

impl ExtractionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Emits tracing events only.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, event: LogEvent) {
        trace_event(&event);

        let Some(path) = &self.path else {
            return;
        };
        let entry = LogEntry {
            timestamp: now_utc_string(),
            event,
        };
        if let Err(err) = append_entry(path, &entry) {
            warn!(
                path = %path.display(),
                event = entry.event.name(),
                error = %format!("{err:#}"),
                "failed to write extraction log entry"
            );
        }
    }

    /// Last `limit` readable entries, oldest first. Unparseable lines are skipped.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        match &self.path {
            Some(path) => read_history(path, limit),
            None => Ok(Vec::new()),
        }
    }
}

pub fn read_history(path: &Path, limit: Option<usize>) -> Result<Vec<LogEntry>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read log {}", path.display()));
        }
    };

    let mut entries = Vec::new();
    for (line_number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => debug!(line = line_number + 1, error = %err, "skipping unreadable log line"),
        }
    }

    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    Ok(entries)
}

fn append_entry(path: &Path, entry: &LogEntry) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    let mut line = serde_json::to_string(entry).context("failed to serialize log entry")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to log {}", path.display()))?;

    Ok(())
}

fn trace_event(event: &LogEvent) {
    match event {
        LogEvent::ExtractionStart(start) => info!(
            extraction_id = %start.extraction_id,
            pdf = %start.pdf_filename,
            bytes = start.size_bytes,
            "extraction started"
        ),
        LogEvent::ExtractionSuccess(success) => info!(
            extraction_id = %success.extraction_id,
            pdf = %success.pdf_filename,
            records = success.extracted_records_count,
            tokens = success.tokens.total,
            cost_czk = success.cost.czk,
            seconds = success.processing_time_seconds,
            "extraction succeeded"
        ),
        LogEvent::ExtractionError(failure) => error!(
            extraction_id = %failure.extraction_id,
            pdf = %failure.pdf_filename,
            kind = %failure.error.kind,
            error = %failure.error.message,
            "extraction failed"
        ),
        LogEvent::SessionSummary(summary) => info!(
            total_files = summary.summary.total_files,
            successful = summary.summary.successful_extractions,
            failed = summary.summary.failed_extractions,
            tokens = summary.summary.total_tokens,
            cost_czk = summary.summary.total_cost_czk,
            "session summary"
        ),
    }
}
