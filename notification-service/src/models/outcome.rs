use chrono::{DateTime, Utc};

/// Result of processing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Delivered,
    Duplicate,
    RetryScheduled {
        attempt: u32,
        next_eligible_at: DateTime<Utc>,
    },
    DeadLettered {
        attempts: u32,
    },
    Rejected,
}

impl Outcome {
    /// Terminal outcomes allow the message's offset to be committed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::RetryScheduled { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::Duplicate => "duplicate",
            Outcome::RetryScheduled { .. } => "retry_scheduled",
            Outcome::DeadLettered { .. } => "dead_lettered",
            Outcome::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
