use std::io::{self, Write};

use anyhow::{Context, Result};
use mrn_extract::event_log::{ExtractionLogger, LogEntry, LogEvent};
use tracing::info;

use crate::cli::HistoryArgs;

pub fn run(args: HistoryArgs) -> Result<()> {
    let entries = ExtractionLogger::new(&args.log_file).history(args.limit)?;
    info!(
        path = %args.log_file.display(),
        entries = entries.len(),
        "loaded extraction history"
    );

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    for entry in &entries {
        if args.json {
            serde_json::to_writer(&mut out, entry).context("failed to serialize log entry")?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", describe(entry))?;
        }
    }
    out.flush()?;

    Ok(())
}

fn describe(entry: &LogEntry) -> String {
    let detail = match &entry.event {
        LogEvent::ExtractionStart(event) => {
            format!("{} model={}", event.pdf_filename, event.model)
        }
        LogEvent::ExtractionSuccess(event) => format!(
            "{} records={} tokens={} cost_usd={} cost_czk={} seconds={}",
            event.pdf_filename,
            event.extracted_records_count,
            event.tokens.total,
            event.cost.usd,
            event.cost.czk,
            event.processing_time_seconds
        ),
        LogEvent::ExtractionError(event) => format!(
            "{} {}: {}",
            event.pdf_filename, event.error.kind, event.error.message
        ),
        LogEvent::SessionSummary(event) => format!(
            "files={} ok={} failed={} cost_usd={} cost_czk={}",
            event.summary.total_files,
            event.summary.successful_extractions,
            event.summary.failed_extractions,
            event.summary.total_cost_usd,
            event.summary.total_cost_czk
        ),
    };

    match entry.event.extraction_id() {
        Some(id) => format!("{}  {:<18}  {id}  {detail}", entry.timestamp, entry.event.name()),
        None => format!("{}  {:<18}  {detail}", entry.timestamp, entry.event.name()),
    }
}
