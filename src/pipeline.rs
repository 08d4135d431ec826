use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, warn};

use crate::classify::classify_pages;
use crate::config::PipelineConfig;
use crate::document::Document;
use crate::error::PipelineError;
use crate::event_log::{
    CostEntry, ErrorEntry, ErrorEvent, ExtractionLogger, LogEvent, StartEvent, SuccessEvent,
    TokenEntry,
};
use crate::extraction::{ExtractionClient, GenerativeModel};
use crate::heuristic::HeuristicExtractor;
use crate::model::{PartialResult, ProcessingResult};
use crate::output::OutputWriter;
use crate::reconcile::reconcile;
use crate::util::{extraction_id_for, round_to, sha256_bytes};

/// One document to process. `document_id` becomes the stem of both output files.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub bytes: Vec<u8>,
    pub output_dir: PathBuf,
    pub document_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Extracting,
    Classifying,
    Reconciling,
    WritingOutputs,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Classifying => "classifying",
            Self::Reconciling => "reconciling",
            Self::WritingOutputs => "writing_outputs",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

struct StageTracker<'a> {
    extraction_id: &'a str,
    current: Stage,
}

impl StageTracker<'_> {
    fn advance(&mut self, next: Stage) {
        debug!(
            extraction_id = %self.extraction_id,
            from = self.current.as_str(),
            to = next.as_str(),
            "pipeline stage"
        );
        self.current = next;
    }
}

/// Sequences load, extraction, classification, reconciliation and output for
/// one document at a time. Holds no per-document state between calls.
pub struct Pipeline<M> {
    model: M,
    config: PipelineConfig,
    logger: ExtractionLogger,
    heuristic: HeuristicExtractor,
}

impl<M: GenerativeModel> Pipeline<M> {
    pub fn new(model: M, config: PipelineConfig, logger: ExtractionLogger) -> Self {
        Self {
            model,
            config,
            logger,
            heuristic: HeuristicExtractor::new(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn logger(&self) -> &ExtractionLogger {
        &self.logger
    }

    pub fn process(&self, input: PipelineInput) -> Result<ProcessingResult, PipelineError> {
        let started = Instant::now();
        let extraction_id = extraction_id_for(Local::now());
        let document_sha256 = sha256_bytes(&input.bytes);
        let pdf_filename = input.document_id.clone();

        self.logger.record(LogEvent::ExtractionStart(StartEvent {
            extraction_id: extraction_id.clone(),
            pdf_filename: pdf_filename.clone(),
            document_sha256: document_sha256.clone(),
            model: self.model.model_name().to_string(),
            size_bytes: input.bytes.len(),
        }));

        let mut stages = StageTracker {
            extraction_id: &extraction_id,
            current: Stage::Idle,
        };

        match self.run(input, &extraction_id, &mut stages, started) {
            Ok(result) => {
                self.logger.record(LogEvent::ExtractionSuccess(SuccessEvent {
                    extraction_id: extraction_id.clone(),
                    pdf_filename,
                    document_sha256,
                    processing_time_seconds: round_to(result.processing_time_seconds, 2),
                    cost: CostEntry::from_usd(
                        result.usage_info.total_cost_usd,
                        self.config.czk_per_usd,
                    ),
                    tokens: TokenEntry {
                        input: result.usage_info.prompt_tokens,
                        output: result.usage_info.completion_tokens,
                        total: result.usage_info.total_tokens,
                    },
                    model: result.usage_info.model.clone(),
                    extraction_path: result.usage_info.path,
                    extracted_records_count: result.extracted_data.len(),
                    output_files: result.output_files.clone(),
                    warnings: result.warnings.clone(),
                }));
                Ok(result)
            }
            Err(error) => {
                stages.advance(Stage::Failed);
                self.logger.record(LogEvent::ExtractionError(ErrorEvent {
                    extraction_id: extraction_id.clone(),
                    pdf_filename,
                    document_sha256: Some(document_sha256),
                    processing_time_seconds: round_to(started.elapsed().as_secs_f64(), 2),
                    error: ErrorEntry {
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    },
                }));
                Err(error)
            }
        }
    }

    fn run(
        &self,
        input: PipelineInput,
        extraction_id: &str,
        stages: &mut StageTracker<'_>,
        started: Instant,
    ) -> Result<ProcessingResult, PipelineError> {
        stages.advance(Stage::Extracting);
        let document = Document::from_bytes(
            input.document_id.as_str(),
            input.bytes,
            self.config.text_backend,
        )?;
        let mut warnings = document.warnings().to_vec();

        let extraction = ExtractionClient::new(&self.model, &self.config).extract(&document)?;
        warnings.extend(extraction.warnings);
        let usage_info = extraction.usage;

        stages.advance(Stage::Classifying);
        let classification = classify_pages(document.pages());

        let mut records = extraction.records;
        if records.is_empty() && self.config.heuristic_fallback {
            let recovered = self.heuristic.extract(document.pages(), &classification);
            if !recovered.is_empty() {
                warn!(
                    extraction_id = %extraction_id,
                    records = recovered.len(),
                    "model returned no records; using text heuristics"
                );
                warnings.push(format!(
                    "model returned no records; {} record(s) built from page text heuristics",
                    recovered.len()
                ));
                records = recovered;
            }
        }

        stages.advance(Stage::Reconciling);
        let reconciliation = reconcile(document.pages(), &classification, records)?;
        warnings.extend(reconciliation.warnings);

        stages.advance(Stage::WritingOutputs);
        let partial = || PartialResult {
            extracted_data: reconciliation.records.clone(),
            usage_info: usage_info.clone(),
        };
        let output_files = OutputWriter::new(&input.output_dir)
            .and_then(|writer| {
                writer.stage(&document, &reconciliation.records, &reconciliation.page_types)
            })
            .and_then(|staged| staged.commit())
            .map_err(|error| error.with_partial(partial()))?;

        stages.advance(Stage::Done);

        Ok(ProcessingResult {
            document_id: input.document_id,
            extraction_id: extraction_id.to_string(),
            extracted_data: reconciliation.records,
            page_types: reconciliation.page_types,
            output_files,
            usage_info,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            assignments: reconciliation.assignments,
            warnings,
        })
    }
}
