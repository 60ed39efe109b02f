use super::event::EventEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification attached to every failed attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    TransientDispatch,
    PermanentDispatch,
    Infrastructure,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::TransientDispatch => "transient_dispatch",
            ErrorClass::PermanentDispatch => "permanent_dispatch",
            ErrorClass::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Succeeded,
    DeadLettered,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Succeeded => write!(f, "succeeded"),
            ProcessingStatus::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { class: ErrorClass, message: String },
}

/// One dispatch attempt in an event's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub number: u32,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Per-event processing state, owned by the retry ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingRecord {
    pub event_id: String,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub status: ProcessingStatus,
    pub history: Vec<Attempt>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn new(event_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.into(),
            attempt_count: 0,
            last_attempt_at: None,
            next_eligible_at: None,
            status: ProcessingStatus::Pending,
            history: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ProcessingStatus::Succeeded | ProcessingStatus::DeadLettered
        )
    }

    /// The class of the most recent failure, if the last attempt failed.
    pub fn last_failure(&self) -> Option<ErrorClass> {
        match self.history.last().map(|a| &a.outcome) {
            Some(AttemptOutcome::Failed { class, .. }) => Some(*class),
            _ => None,
        }
    }

    /// True once the record can no longer be retried and must be dead-lettered.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self.last_failure() {
            Some(ErrorClass::PermanentDispatch) => true,
            Some(_) => self.attempt_count >= max_attempts,
            None => false,
        }
    }
}

/// Write-once artifact for an event that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterRecord {
    pub event_id: String,
    pub envelope: EventEnvelope,
    pub attempts: Vec<Attempt>,
    pub reason: ErrorClass,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(envelope: EventEnvelope, record: &ProcessingRecord, at: DateTime<Utc>) -> Self {
        Self {
            event_id: envelope.event_id().to_string(),
            envelope,
            attempts: record.history.clone(),
            reason: record
                .last_failure()
                .unwrap_or(ErrorClass::TransientDispatch),
            dead_lettered_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(record: &mut ProcessingRecord, class: ErrorClass) {
        record.attempt_count += 1;
        record.history.push(Attempt {
            number: record.attempt_count,
            at: Utc::now(),
            outcome: AttemptOutcome::Failed {
                class,
                message: "boom".to_string(),
            },
        });
    }

    #[test]
    fn test_exhaustion_after_max_transient_failures() {
        let mut record = ProcessingRecord::new("e1", Utc::now());
        for _ in 0..4 {
            failed(&mut record, ErrorClass::TransientDispatch);
        }
        assert!(!record.is_exhausted(5));

        failed(&mut record, ErrorClass::TransientDispatch);
        assert!(record.is_exhausted(5));
    }

    #[test]
    fn test_permanent_failure_exhausts_immediately() {
        let mut record = ProcessingRecord::new("e1", Utc::now());
        failed(&mut record, ErrorClass::PermanentDispatch);
        assert!(record.is_exhausted(5));
    }

    #[test]
    fn test_terminal_record_is_never_exhausted() {
        let mut record = ProcessingRecord::new("e1", Utc::now());
        failed(&mut record, ErrorClass::PermanentDispatch);
        record.status = ProcessingStatus::DeadLettered;
        assert!(!record.is_exhausted(5));
    }

    #[test]
    fn test_attempt_serializes_flat() {
        let attempt = Attempt {
            number: 2,
            at: Utc::now(),
            outcome: AttemptOutcome::Failed {
                class: ErrorClass::TransientDispatch,
                message: "smtp unavailable".to_string(),
            },
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["class"], "transient_dispatch");
        assert_eq!(json["number"], 2);
    }
}
