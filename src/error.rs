//! Error taxonomy for a review run.
//!
//! Collection and generation failures are absorbed into the report
//! (`collection_errors`) and the narrative (`origin = fallback`). Only
//! aggregation invariant violations and artifact sink failures abort a run.
//! Per-source collection failures are [`crate::models::CollectionError`].

use crate::models::Source;
use std::time::Duration;
use thiserror::Error;

/// Failure of a raw read-only data source call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source not configured: {0}")]
    NotConfigured(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Internal invariant violation while merging collector output.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("{source_name} produced a finding with an empty {field}")]
    EmptyField {
        source_name: Source,
        field: &'static str,
    },

    #[error("{0} emitted a synthetic error record as a finding")]
    SyntheticFinding(Source),

    #[error("{0} reported more than once")]
    DuplicateSource(Source),
}

/// I/O failure on the artifact sink.
#[derive(Debug, Error)]
#[error("failed to write artifact {name}: {cause}")]
pub struct WriteError {
    pub name: String,
    #[source]
    pub cause: std::io::Error,
}

/// Model invocation failure. Always recovered by the fallback narrative.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model call cancelled")]
    Cancelled,

    #[error("cannot reach model endpoint: {0}")]
    Connect(String),

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model returned an empty response")]
    Empty,

    #[error("model response echoes the prompt")]
    PromptEcho,

    #[error("model summarization disabled")]
    Disabled,
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A timeout has already spent the call budget, and an empty or malformed
    /// answer goes straight to the fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Connect(_) => true,
            GenerationError::Api { status, .. } => *status == 429 || *status >= 500,
            GenerationError::Timeout(_)
            | GenerationError::Cancelled
            | GenerationError::Malformed(_)
            | GenerationError::Empty
            | GenerationError::PromptEcho
            | GenerationError::Disabled => false,
        }
    }
}

/// Failure reported by the delivery transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("artifact upload failed: {0}")]
    Upload(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level run failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Write(#[from] WriteError),
}
