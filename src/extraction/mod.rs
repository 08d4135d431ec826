//! Model-backed record extraction: provider seam, Gemini REST client,
//! response parsing and the native-document / text fallback strategy.

mod client;
mod gemini;
mod parse;
mod provider;

pub use client::{AttemptRecord, DEFAULT_PATHS, Extraction, ExtractionClient, run_strategies};
pub use gemini::{DEFAULT_API_BASE, GeminiClient};
pub use parse::{ParseOutcome, parse_response};
pub use provider::{DocumentUpload, GenerativeModel, ModelResponse, PDF_MIME_TYPE};
