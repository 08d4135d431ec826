use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ExtractionPath, PartialResult};

/// Failure of a single call to the generative model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("model returned no text")]
    EmptyResponse,
}

impl ModelError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::Quota(_) => "quota",
            Self::Service { .. } => "service",
            Self::Upload(_) => "upload",
            Self::EmptyResponse => "empty_response",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load PDF document '{document_id}': {reason}")]
    InvalidDocument { document_id: String, reason: String },

    #[error("extraction failed after {} attempt(s) ({}): {source}", attempts.len(), render_attempts(attempts))]
    ExtractionFailure {
        attempts: Vec<ExtractionPath>,
        #[source]
        source: ModelError,
    },

    #[error("page {page} is out of range for a {page_count}-page document ({context})")]
    PageIndexOutOfRange {
        page: u32,
        page_count: usize,
        context: String,
    },

    #[error("failed to write output {}: {source}", path.display())]
    OutputWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
        partial: Option<Box<PartialResult>>,
    },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDocument { .. } => "InvalidDocument",
            Self::ExtractionFailure { .. } => "ExtractionFailure",
            Self::PageIndexOutOfRange { .. } => "PageIndexOutOfRange",
            Self::OutputWriteFailure { .. } => "OutputWriteFailure",
        }
    }

    pub(crate) fn output_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::OutputWriteFailure {
            path: path.into(),
            source,
            partial: None,
        }
    }

    /// Attaches already-computed data to an output failure; other variants pass through.
    pub(crate) fn with_partial(self, partial: PartialResult) -> Self {
        match self {
            Self::OutputWriteFailure { path, source, .. } => Self::OutputWriteFailure {
                path,
                source,
                partial: Some(Box::new(partial)),
            },
            other => other,
        }
    }
}

fn render_attempts(attempts: &[ExtractionPath]) -> String {
    attempts
        .iter()
        .map(|path| path.as_str())
        .collect::<Vec<&str>>()
        .join(" -> ")
}
