//! Per-event attempt counts and retry eligibility.
//!
//! Updates for one event id are serialized by the map's per-key locking.
//! Different event ids never coordinate. Two workers never touch the same
//! event id concurrently because the topic is partitioned by key.

use crate::error::InfrastructureError;
use crate::models::{Attempt, AttemptOutcome, ProcessingRecord, ProcessingStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[async_trait]
pub trait RetryLedger: Send + Sync {
    async fn get(&self, event_id: &str) -> Result<Option<ProcessingRecord>, InfrastructureError>;

    /// Append an attempt, creating the record on first use.
    async fn record_attempt(
        &self,
        event_id: &str,
        outcome: AttemptOutcome,
        at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError>;

    async fn schedule_retry(
        &self,
        event_id: &str,
        next_eligible_at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError>;

    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError>;

    /// Claim every pending record whose retry time has passed.
    ///
    /// Claimed records move to `Processing` so a second call does not return
    /// them again. Ids come back ordered by eligibility time.
    async fn due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<String>, InfrastructureError>;

    /// Return a claimed record to `Pending` without counting an attempt.
    async fn release(&self, event_id: &str) -> Result<(), InfrastructureError>;

    /// Drop terminal records older than the retention window.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, InfrastructureError>;

    async fn health_check(&self) -> Result<(), InfrastructureError>;
}

pub struct InMemoryRetryLedger {
    records: DashMap<String, ProcessingRecord>,
    retention: Duration,
}

impl InMemoryRetryLedger {
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn update<F>(&self, event_id: &str, f: F) -> Result<ProcessingRecord, InfrastructureError>
    where
        F: FnOnce(&mut ProcessingRecord),
    {
        let mut record = self.records.get_mut(event_id).ok_or_else(|| {
            InfrastructureError::Ledger(format!("No processing record for event {}", event_id))
        })?;
        f(&mut record);
        Ok(record.clone())
    }
}

#[async_trait]
impl RetryLedger for InMemoryRetryLedger {
    async fn get(&self, event_id: &str) -> Result<Option<ProcessingRecord>, InfrastructureError> {
        Ok(self.records.get(event_id).map(|r| r.clone()))
    }

    async fn record_attempt(
        &self,
        event_id: &str,
        outcome: AttemptOutcome,
        at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError> {
        let mut record = self
            .records
            .entry(event_id.to_string())
            .or_insert_with(|| ProcessingRecord::new(event_id, at));

        record.attempt_count += 1;
        record.last_attempt_at = Some(at);
        record.next_eligible_at = None;
        record.updated_at = at;
        record.status = match outcome {
            AttemptOutcome::Succeeded => ProcessingStatus::Succeeded,
            AttemptOutcome::Failed { .. } => ProcessingStatus::Pending,
        };
        let number = record.attempt_count;
        record.history.push(Attempt {
            number,
            at,
            outcome,
        });

        Ok(record.clone())
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        next_eligible_at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError> {
        self.update(event_id, |record| {
            record.status = ProcessingStatus::Pending;
            record.next_eligible_at = Some(next_eligible_at);
        })
    }

    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ProcessingRecord, InfrastructureError> {
        self.update(event_id, |record| {
            record.status = ProcessingStatus::DeadLettered;
            record.next_eligible_at = None;
            record.updated_at = at;
        })
    }

    async fn due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<String>, InfrastructureError> {
        let mut due: Vec<(DateTime<Utc>, String)> = Vec::new();

        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.status != ProcessingStatus::Pending {
                continue;
            }
            if let Some(eligible_at) = record.next_eligible_at {
                if eligible_at <= now {
                    record.status = ProcessingStatus::Processing;
                    due.push((eligible_at, record.event_id.clone()));
                }
            }
        }

        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn release(&self, event_id: &str) -> Result<(), InfrastructureError> {
        self.update(event_id, |record| {
            if record.status == ProcessingStatus::Processing {
                record.status = ProcessingStatus::Pending;
            }
        })
        .map(|_| ())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, InfrastructureError> {
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.is_terminal() && now.signed_duration_since(record.updated_at) >= self.retention)
        });
        Ok(before.saturating_sub(self.records.len()))
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorClass;

    fn failure() -> AttemptOutcome {
        AttemptOutcome::Failed {
            class: ErrorClass::TransientDispatch,
            message: "unavailable".to_string(),
        }
    }

    fn ledger() -> InMemoryRetryLedger {
        InMemoryRetryLedger::new(std::time::Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_record_attempt_creates_and_increments() {
        let ledger = ledger();
        let now = Utc::now();

        let first = ledger.record_attempt("e1", failure(), now).await.unwrap();
        assert_eq!(first.attempt_count, 1);
        assert_eq!(first.status, ProcessingStatus::Pending);

        let second = ledger
            .record_attempt("e1", AttemptOutcome::Succeeded, now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.status, ProcessingStatus::Succeeded);
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[0].number, 1);
        assert_eq!(second.history[1].number, 2);
    }

    #[tokio::test]
    async fn test_due_for_retry_claims_once_in_eligibility_order() {
        let ledger = ledger();
        let now = Utc::now();

        for id in ["late", "early", "future"] {
            ledger.record_attempt(id, failure(), now).await.unwrap();
        }
        ledger
            .schedule_retry("late", now - Duration::seconds(1))
            .await
            .unwrap();
        ledger
            .schedule_retry("early", now - Duration::seconds(5))
            .await
            .unwrap();
        ledger
            .schedule_retry("future", now + Duration::seconds(60))
            .await
            .unwrap();

        let due = ledger.due_for_retry(now).await.unwrap();
        assert_eq!(due, vec!["early".to_string(), "late".to_string()]);

        let again = ledger.due_for_retry(now).await.unwrap();
        assert!(again.is_empty());

        let claimed = ledger.get("early").await.unwrap().unwrap();
        assert_eq!(claimed.status, ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn test_release_returns_claim_to_pending() {
        let ledger = ledger();
        let now = Utc::now();
        ledger.record_attempt("e1", failure(), now).await.unwrap();
        ledger.schedule_retry("e1", now).await.unwrap();
        ledger.due_for_retry(now).await.unwrap();

        ledger.release("e1").await.unwrap();

        assert_eq!(ledger.due_for_retry(now).await.unwrap(), vec!["e1".to_string()]);
    }

    #[tokio::test]
    async fn test_schedule_unknown_event_is_an_error() {
        let ledger = ledger();
        assert!(ledger.schedule_retry("missing", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_terminal_records() {
        let ledger = ledger();
        let now = Utc::now();
        let old = now - Duration::hours(2);

        ledger
            .record_attempt("done-old", AttemptOutcome::Succeeded, old)
            .await
            .unwrap();
        ledger
            .record_attempt("done-new", AttemptOutcome::Succeeded, now)
            .await
            .unwrap();
        ledger.record_attempt("pending-old", failure(), old).await.unwrap();

        let purged = ledger.purge_expired(now).await.unwrap();

        assert_eq!(purged, 1);
        assert!(ledger.get("done-old").await.unwrap().is_none());
        assert!(ledger.get("done-new").await.unwrap().is_some());
        assert!(ledger.get("pending-old").await.unwrap().is_some());
    }
}
