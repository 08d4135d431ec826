//! Customs PDF extraction pipeline.
//!
//! Loads a logistics PDF, asks a generative model for shipment records,
//! classifies pages with text heuristics, attributes MRN (customs declaration)
//! pages to records and writes a CSV export plus a PDF holding only the MRN
//! pages.

pub mod classify;
pub mod config;
pub mod document;
pub mod error;
pub mod event_log;
pub mod extraction;
pub mod heuristic;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use error::{ModelError, PipelineError};
pub use event_log::ExtractionLogger;
pub use extraction::{GeminiClient, GenerativeModel};
pub use pipeline::{Pipeline, PipelineInput};
