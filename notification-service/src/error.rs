//! Error taxonomy for the consumption pipeline.

use rust_decimal::Decimal;
use thiserror::Error;

/// A message that can never be processed. Permanent: rejected, not retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid event: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("Order total must not be negative: {0}")]
    NegativeTotal(Decimal),
}

/// A backing store could not be reached. Retried at the worker
/// level; never consumes a notification attempt.
#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("Dedup store error: {0}")]
    Dedup(String),

    #[error("Retry ledger error: {0}")]
    Ledger(String),

    #[error("Dead-letter sink error: {0}")]
    DeadLetter(String),
}

impl InfrastructureError {
    pub fn component(&self) -> &'static str {
        match self {
            InfrastructureError::Dedup(_) => "dedup",
            InfrastructureError::Ledger(_) => "ledger",
            InfrastructureError::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Why `EventProcessor::process` could not reach an outcome.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Dead-letter write failed for event {event_id}: {source}")]
    DeadLetterWrite {
        event_id: String,
        source: InfrastructureError,
    },
}

impl ProcessingError {
    pub fn component(&self) -> &'static str {
        match self {
            ProcessingError::Infrastructure(e) => e.component(),
            ProcessingError::DeadLetterWrite { .. } => "dead_letter",
        }
    }
}
