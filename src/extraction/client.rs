use tracing::{info, warn};

use crate::config::{PipelineConfig, USER_INSTRUCTION};
use crate::document::Document;
use crate::error::{ModelError, PipelineError};
use crate::model::{ExtractedRecord, ExtractionPath, UsageInfo};

use super::parse::parse_response;
use super::provider::{DocumentUpload, GenerativeModel, ModelResponse, PDF_MIME_TYPE};

/// Paths tried in order: the model reads the PDF itself, then plain page text.
pub const DEFAULT_PATHS: [ExtractionPath; 2] =
    [ExtractionPath::NativeDocument, ExtractionPath::TextFallback];

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub path: ExtractionPath,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub records: Vec<ExtractedRecord>,
    pub usage: UsageInfo,
    pub path: ExtractionPath,
    pub attempts: Vec<AttemptRecord>,
    pub warnings: Vec<String>,
}

/// Tries each path in order and returns the first success.
///
/// Every failed path is recorded; when all fail the last error is kept as the
/// source of `ExtractionFailure`.
pub fn run_strategies<T>(
    paths: &[ExtractionPath],
    mut attempt: impl FnMut(ExtractionPath) -> Result<T, ModelError>,
) -> Result<(ExtractionPath, T, Vec<AttemptRecord>), PipelineError> {
    let mut attempts = Vec::with_capacity(paths.len());
    let mut last_error = None;

    for path in paths {
        match attempt(*path) {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    path: *path,
                    error: None,
                });
                return Ok((*path, value, attempts));
            }
            Err(error) => {
                warn!(path = path.as_str(), kind = error.kind(), error = %error, "extraction path failed");
                attempts.push(AttemptRecord {
                    path: *path,
                    error: Some(error.to_string()),
                });
                last_error = Some(error);
            }
        }
    }

    Err(PipelineError::ExtractionFailure {
        attempts: attempts.iter().map(|attempt| attempt.path).collect(),
        source: last_error
            .unwrap_or_else(|| ModelError::Transport("no extraction path configured".to_string())),
    })
}

pub struct ExtractionClient<'a, M> {
    model: &'a M,
    config: &'a PipelineConfig,
}

impl<'a, M: GenerativeModel> ExtractionClient<'a, M> {
    pub fn new(model: &'a M, config: &'a PipelineConfig) -> Self {
        Self { model, config }
    }

    pub fn extract(&self, document: &Document) -> Result<Extraction, PipelineError> {
        let prompt = format!("{}\n\n{}", self.config.system_prompt(), USER_INSTRUCTION);
        let mut warnings = Vec::new();

        let (path, response, attempts) = run_strategies(&DEFAULT_PATHS, |path| {
            self.call(path, &prompt, document, &mut warnings)
        })?;

        let usage = self.usage_for(&response, path);
        info!(
            path = path.as_str(),
            model = %usage.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd = usage.total_cost_usd,
            "model call completed"
        );

        let (records, parse_warnings) = parse_response(&response.text).into_parts();
        for warning in &parse_warnings {
            warn!(warning = %warning, "response parse recovery");
        }
        warnings.extend(parse_warnings);

        Ok(Extraction {
            records,
            usage,
            path,
            attempts,
            warnings,
        })
    }

    fn call(
        &self,
        path: ExtractionPath,
        prompt: &str,
        document: &Document,
        warnings: &mut Vec<String>,
    ) -> Result<ModelResponse, ModelError> {
        match path {
            ExtractionPath::NativeDocument => {
                let display_name = format!("{}.pdf", document.stem());
                self.model.generate_from_document(
                    prompt,
                    DocumentUpload {
                        display_name: &display_name,
                        mime_type: PDF_MIME_TYPE,
                        bytes: document.bytes(),
                    },
                )
            }
            ExtractionPath::TextFallback => {
                let text = document.fallback_text();
                if text.trim().is_empty() {
                    warnings.push(
                        "text fallback sent with no extractable page text".to_string(),
                    );
                }
                self.model
                    .generate_from_text(&format!("{prompt}\n\nPDF content:\n{text}"))
            }
        }
    }

    fn usage_for(&self, response: &ModelResponse, path: ExtractionPath) -> UsageInfo {
        let model = self.model.model_name().to_string();
        let cost = self.config.pricing_table.cost(
            &model,
            response.prompt_tokens,
            response.completion_tokens,
        );

        UsageInfo {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            total_tokens: response.prompt_tokens + response.completion_tokens,
            input_cost_usd: cost.input_cost,
            output_cost_usd: cost.output_cost,
            total_cost_usd: cost.total(),
            input_price_per_million: cost.input_price_per_million,
            output_price_per_million: cost.output_price_per_million,
            model,
            path,
        }
    }
}
