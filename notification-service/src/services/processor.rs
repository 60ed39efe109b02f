//! Orchestrates one message: decode, dedup, dispatch, record, retry or dead-letter.
//!
//! Ordering of side effects for an attempt: the dispatcher call completes
//! before the ledger or dedup store is touched, and the ledger records success
//! before the dedup entry is written. A crash anywhere in between leads to a
//! redelivery and another dispatch, never to a false "delivered".

use crate::config::{DispatchConfig, RetryConfig};
use crate::error::{InfrastructureError, ProcessingError, ValidationError};
use crate::models::{
    decode, AttemptOutcome, DeadLetterRecord, ErrorClass, EventEnvelope, Outcome,
    ProcessingRecord, ProcessingStatus, TransportMetadata,
};
use crate::services::backoff::BackoffPolicy;
use crate::services::dead_letter::DeadLetterSink;
use crate::services::dedup::DedupStore;
use crate::services::dispatchers::{ChannelError, NotificationDispatcher};
use crate::services::ledger::RetryLedger;
use crate::services::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub backoff: BackoffPolicy,
    pub max_attempts: u32,
    pub dispatch_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: 5,
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

impl ProcessorSettings {
    pub fn from_config(retry: &RetryConfig, dispatch: &DispatchConfig) -> Self {
        Self {
            backoff: retry.backoff_policy(),
            max_attempts: retry.max_attempts,
            dispatch_timeout: dispatch.timeout(),
        }
    }
}

/// Result of handling a raw message. The envelope is absent when the payload
/// was rejected.
#[derive(Debug, Clone)]
pub struct Processed {
    pub outcome: Outcome,
    pub envelope: Option<EventEnvelope>,
}

pub struct EventProcessor {
    dedup: Arc<dyn DedupStore>,
    ledger: Arc<dyn RetryLedger>,
    sink: Arc<dyn DeadLetterSink>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    settings: ProcessorSettings,
}

impl EventProcessor {
    pub fn new(
        dedup: Arc<dyn DedupStore>,
        ledger: Arc<dyn RetryLedger>,
        sink: Arc<dyn DeadLetterSink>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            dedup,
            ledger,
            sink,
            dispatcher,
            settings,
        }
    }

    /// Decode a raw payload and process it. Undecodable payloads are rejected
    /// without touching any store.
    pub async fn process_payload(
        &self,
        payload: Option<&[u8]>,
        transport: TransportMetadata,
    ) -> Result<Processed, ProcessingError> {
        match decode(payload, transport.clone()) {
            Ok(envelope) => {
                let outcome = self.process(&envelope).await?;
                Ok(Processed {
                    outcome,
                    envelope: Some(envelope),
                })
            }
            Err(e) => Ok(Processed {
                outcome: self.reject(&transport, &e),
                envelope: None,
            }),
        }
    }

    fn reject(&self, transport: &TransportMetadata, error: &ValidationError) -> Outcome {
        let outcome = Outcome::Rejected;
        metrics::record_outcome(&outcome);
        tracing::warn!(
            outcome = %outcome,
            topic = %transport.topic,
            partition = transport.partition,
            offset = transport.offset,
            attempt_count = 0,
            error_class = %ErrorClass::Validation,
            error = %error,
            "Rejected malformed event"
        );
        outcome
    }

    pub async fn process(&self, envelope: &EventEnvelope) -> Result<Outcome, ProcessingError> {
        let event_id = envelope.event_id();

        if self.dedup.has(event_id).await? {
            return Ok(self.duplicate(envelope, None));
        }

        let existing = self.ledger.get(event_id).await?;
        if let Some(record) = existing {
            match record.status {
                ProcessingStatus::Succeeded => {
                    // Ledger saw the success but the dedup write never landed
                    let at = record.last_attempt_at.unwrap_or_else(Utc::now);
                    self.dedup.mark_processed(event_id, at).await?;
                    return Ok(self.duplicate(envelope, Some(&record)));
                }
                ProcessingStatus::DeadLettered => {
                    return Ok(self.duplicate(envelope, Some(&record)));
                }
                _ if record.is_exhausted(self.settings.max_attempts) => {
                    tracing::info!(
                        event_id = %event_id,
                        attempt_count = record.attempt_count,
                        "Retrying pending dead-letter write"
                    );
                    return self.dead_letter(envelope, &record).await;
                }
                ProcessingStatus::Pending => {
                    if let Some(next_eligible_at) = record.next_eligible_at {
                        if next_eligible_at > Utc::now() {
                            // Redelivered while parked; the retry queue owns it
                            let outcome = Outcome::RetryScheduled {
                                attempt: record.attempt_count,
                                next_eligible_at,
                            };
                            metrics::record_outcome(&outcome);
                            tracing::info!(
                                event_id = %event_id,
                                outcome = %outcome,
                                attempt_count = record.attempt_count,
                                error_class = record.last_failure().map(|c| c.as_str()).unwrap_or("none"),
                                next_eligible_at = %next_eligible_at,
                                partition = envelope.transport.partition,
                                offset = envelope.transport.offset,
                                "Redelivered while awaiting retry"
                            );
                            return Ok(outcome);
                        }
                    }
                }
                ProcessingStatus::Processing => {}
            }
        }

        let result = self.dispatch(envelope).await;
        let now = Utc::now();

        match result {
            Ok(()) => {
                let record = self
                    .ledger
                    .record_attempt(event_id, AttemptOutcome::Succeeded, now)
                    .await?;
                self.dedup.mark_processed(event_id, now).await?;

                let outcome = Outcome::Delivered;
                log_outcome(envelope, &outcome, record.attempt_count, None);
                Ok(outcome)
            }
            Err(e) => {
                let class = e.class();
                let record = self
                    .ledger
                    .record_attempt(
                        event_id,
                        AttemptOutcome::Failed {
                            class,
                            message: e.to_string(),
                        },
                        now,
                    )
                    .await?;

                if record.is_exhausted(self.settings.max_attempts) {
                    return self.dead_letter(envelope, &record).await;
                }

                let next_eligible_at = self.next_eligible_at(record.attempt_count, now);
                self.ledger
                    .schedule_retry(event_id, next_eligible_at)
                    .await?;

                let outcome = Outcome::RetryScheduled {
                    attempt: record.attempt_count,
                    next_eligible_at,
                };
                metrics::record_outcome(&outcome);
                tracing::info!(
                    event_id = %event_id,
                    outcome = %outcome,
                    attempt_count = record.attempt_count,
                    error_class = %class,
                    next_eligible_at = %next_eligible_at,
                    error = %e,
                    "Dispatch failed, retry scheduled"
                );
                Ok(outcome)
            }
        }
    }

    async fn dispatch(&self, envelope: &EventEnvelope) -> Result<(), ChannelError> {
        let channel = self.dispatcher.channel();
        let start = Instant::now();

        let result = match tokio::time::timeout(
            self.settings.dispatch_timeout,
            self.dispatcher.send(envelope),
        )
        .await
        {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(ChannelError::Timeout(format!(
                "{} dispatch exceeded {:?}",
                channel, self.settings.dispatch_timeout
            ))),
        };

        let status = match &result {
            Ok(()) => "success",
            Err(e) if e.is_transient() => "transient_error",
            Err(_) => "permanent_error",
        };
        metrics::record_dispatch(channel, status, start.elapsed());

        result
    }

    fn next_eligible_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.settings.backoff.delay_for(attempt);
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        now + delay
    }

    async fn dead_letter(
        &self,
        envelope: &EventEnvelope,
        record: &ProcessingRecord,
    ) -> Result<Outcome, ProcessingError> {
        let now = Utc::now();
        let dead_letter = DeadLetterRecord::new(envelope.clone(), record, now);

        if let Err(source) = self.sink.send(&dead_letter).await {
            metrics::record_dead_letter_write("failure");
            tracing::error!(
                event_id = %dead_letter.event_id,
                attempt_count = record.attempt_count,
                error_class = %dead_letter.reason,
                error = %source,
                "Failed to write dead letter; event stays unresolved"
            );
            return Err(ProcessingError::DeadLetterWrite {
                event_id: dead_letter.event_id,
                source,
            });
        }
        metrics::record_dead_letter_write("success");

        self.ledger
            .mark_dead_lettered(&dead_letter.event_id, now)
            .await?;

        let outcome = Outcome::DeadLettered {
            attempts: record.attempt_count,
        };
        log_outcome(envelope, &outcome, record.attempt_count, Some(dead_letter.reason));
        Ok(outcome)
    }

    fn duplicate(&self, envelope: &EventEnvelope, record: Option<&ProcessingRecord>) -> Outcome {
        let outcome = Outcome::Duplicate;
        log_outcome(
            envelope,
            &outcome,
            record.map(|r| r.attempt_count).unwrap_or(0),
            None,
        );
        outcome
    }

    /// Health of the stores this processor writes to and of its channel.
    pub async fn health_check(&self) -> Vec<(&'static str, Result<(), String>)> {
        fn check<E: std::fmt::Display>(result: Result<(), E>) -> Result<(), String> {
            result.map_err(|e| e.to_string())
        }

        vec![
            ("dedup", check(self.dedup.health_check().await)),
            ("ledger", check(self.ledger.health_check().await)),
            ("dead_letter", check(self.sink.health_check().await)),
            ("dispatcher", check(self.dispatcher.health_check().await)),
        ]
    }

    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<(usize, usize), InfrastructureError> {
        let evicted = self.dedup.evict_expired(now).await?;
        let purged = self.ledger.purge_expired(now).await?;
        Ok((evicted, purged))
    }
}

fn log_outcome(
    envelope: &EventEnvelope,
    outcome: &Outcome,
    attempt_count: u32,
    error_class: Option<ErrorClass>,
) {
    metrics::record_outcome(outcome);
    let error_class = error_class.map(|c| c.as_str()).unwrap_or("none");
    let transport = &envelope.transport;

    match outcome {
        Outcome::DeadLettered { .. } => tracing::warn!(
            event_id = %envelope.event_id(),
            outcome = %outcome,
            attempt_count = attempt_count,
            error_class = error_class,
            partition = transport.partition,
            offset = transport.offset,
            "Event dead-lettered"
        ),
        _ => tracing::info!(
            event_id = %envelope.event_id(),
            outcome = %outcome,
            attempt_count = attempt_count,
            error_class = error_class,
            partition = transport.partition,
            offset = transport.offset,
            "Event processed"
        ),
    }
}
