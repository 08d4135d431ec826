use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mrn_extract::config::{DEFAULT_EXTRACTION_PROMPT, PipelineConfig};
use mrn_extract::event_log::{ExtractionLogger, LogEvent, SummaryEvent};
use mrn_extract::model::{ProcessingResult, SessionSummary};
use mrn_extract::util::{round_to, write_json_pretty};
use mrn_extract::{GeminiClient, GenerativeModel, Pipeline, PipelineInput};
use tracing::{error, info};

use crate::cli::ExtractArgs;

pub fn run(args: ExtractArgs) -> Result<()> {
    let pdf_paths = match (&args.input, &args.input_dir) {
        (Some(input), _) => vec![input.clone()],
        (None, Some(input_dir)) => discover_pdfs(input_dir)?,
        (None, None) => bail!("either --input or --input-dir is required"),
    };

    if pdf_paths.is_empty() {
        bail!(
            "no PDF files found in {}",
            args.input_dir
                .as_deref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default()
        );
    }

    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("GOOGLE_API_KEY is not set; export it or pass --api-key")?;

    let config = pipeline_config(&args)?;
    let mut client =
        GeminiClient::from_config(api_key, &config).context("failed to build Gemini client")?;
    if let Some(api_base) = &args.api_base {
        client = client.with_api_base(api_base);
    }

    let logger = if args.no_log_file {
        ExtractionLogger::disabled()
    } else {
        ExtractionLogger::new(&args.log_file)
    };

    info!(
        files = pdf_paths.len(),
        model = %config.model_name,
        output_dir = %args.output_dir.display(),
        "starting extraction session"
    );

    let czk_per_usd = config.czk_per_usd;
    let pipeline = Pipeline::new(client, config, logger);
    let mut summary = SessionSummary {
        total_files: pdf_paths.len(),
        ..SessionSummary::default()
    };

    for path in &pdf_paths {
        match process_file(&pipeline, path, &args.output_dir) {
            Ok(result) => {
                info!(
                    pdf = %path.display(),
                    records = result.extracted_data.len(),
                    csv = %result.output_files.csv.display(),
                    cost_usd = result.usage_info.total_cost_usd,
                    seconds = round_to(result.processing_time_seconds, 2),
                    "processed PDF"
                );
                add_to_summary(&mut summary, &result);
            }
            Err(err) => {
                summary.failed_extractions += 1;
                error!(pdf = %path.display(), error = %format!("{err:#}"), "failed to process PDF");
            }
        }
    }

    finish_summary(&mut summary, czk_per_usd);
    pipeline
        .logger()
        .record(LogEvent::SessionSummary(SummaryEvent {
            summary: summary.clone(),
        }));

    info!(
        successful = summary.successful_extractions,
        failed = summary.failed_extractions,
        total_cost_usd = summary.total_cost_usd,
        total_cost_czk = summary.total_cost_czk,
        total_tokens = summary.total_tokens,
        "extraction session complete"
    );

    if let Some(summary_json) = &args.summary_json {
        write_json_pretty(summary_json, &summary)?;
        info!(path = %summary_json.display(), "wrote session summary");
    }

    if summary.failed_extractions > 0 {
        bail!(
            "{} of {} PDF file(s) failed",
            summary.failed_extractions,
            summary.total_files
        );
    }

    Ok(())
}

fn pipeline_config(args: &ExtractArgs) -> Result<PipelineConfig> {
    let prompt = match &args.prompt_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file: {}", path.display()))?,
        None => DEFAULT_EXTRACTION_PROMPT.to_string(),
    };

    Ok(PipelineConfig {
        model_name: args.model.clone(),
        prompt,
        request_timeout_seconds: args.timeout_seconds,
        text_backend: args.text_backend,
        heuristic_fallback: !args.no_heuristic_fallback,
        czk_per_usd: args.czk_per_usd,
        ..PipelineConfig::default()
    })
}

fn process_file<M: GenerativeModel>(
    pipeline: &Pipeline<M>,
    path: &Path,
    output_dir: &Path,
) -> Result<ProcessingResult> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let document_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("PDF file name is not valid UTF-8: {}", path.display()))?
        .to_string();

    pipeline
        .process(PipelineInput {
            bytes,
            output_dir: output_dir.to_path_buf(),
            document_id,
        })
        .with_context(|| format!("failed to process {}", path.display()))
}

fn add_to_summary(summary: &mut SessionSummary, result: &ProcessingResult) {
    summary.successful_extractions += 1;
    summary.total_cost_usd += result.usage_info.total_cost_usd;
    summary.total_tokens += result.usage_info.total_tokens;
    summary.total_processing_time_seconds += result.processing_time_seconds;
}

fn finish_summary(summary: &mut SessionSummary, czk_per_usd: f64) {
    summary.total_cost_czk = round_to(summary.total_cost_usd * czk_per_usd, 2);
    summary.total_cost_usd = round_to(summary.total_cost_usd, 6);
    summary.total_processing_time_seconds = round_to(summary.total_processing_time_seconds, 2);
}

fn discover_pdfs(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();

    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("failed to read {}", input_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", input_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            pdfs.push(path);
        }
    }

    pdfs.sort();
    Ok(pdfs)
}
