//! Durable destinations for events that exhausted their retries.
//!
//! A failed write is never swallowed: the caller keeps the event unresolved
//! so the write is attempted again.

pub mod file;
pub mod kafka;
pub mod mongo;

use crate::error::InfrastructureError;
use crate::models::DeadLetterRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use file::FileDeadLetterSink;
pub use kafka::KafkaDeadLetterSink;
pub use mongo::MongoDeadLetterSink;

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// At-least-once write. Writing the same record twice must be harmless.
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), InfrastructureError>;
    async fn health_check(&self) -> Result<(), InfrastructureError>;
}

/// Keeps dead letters in memory. Used by tests and local runs.
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
    available: AtomicBool,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every write fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for InMemoryDeadLetterSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), InfrastructureError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(InfrastructureError::DeadLetter(
                "In-memory sink unavailable".to_string(),
            ));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|e| InfrastructureError::DeadLetter(e.to_string()))?;
        if !records.iter().any(|r| r.event_id == record.event_id) {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InfrastructureError::DeadLetter(
                "In-memory sink unavailable".to_string(),
            ))
        }
    }
}
