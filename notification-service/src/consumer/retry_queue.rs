//! Internal delay queue for envelopes whose dispatch must be retried later.
//!
//! Parked envelopes do not block their partition: later offsets keep flowing
//! while a parked event waits for its `next_eligible_at`. Retries of the same
//! order can therefore land after newer events for that order.

use crate::error::InfrastructureError;
use crate::models::EventEnvelope;
use crate::services::ledger::RetryLedger;
use crate::services::metrics;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct RetryQueue {
    ledger: Arc<dyn RetryLedger>,
    parked: Mutex<HashMap<String, EventEnvelope>>,
}

impl RetryQueue {
    pub fn new(ledger: Arc<dyn RetryLedger>) -> Self {
        Self {
            ledger,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Hold an envelope until the ledger reports it due.
    ///
    /// One envelope is kept per event: the one with the lowest offset. When a
    /// redelivery meets an already parked copy, the envelope that is not kept
    /// comes back so the caller can resolve its offset.
    pub fn park(&self, envelope: EventEnvelope) -> Option<EventEnvelope> {
        let (displaced, depth) = match self.parked.lock() {
            Ok(mut parked) => {
                let displaced = match parked.entry(envelope.event_id().to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(envelope);
                        None
                    }
                    Entry::Occupied(mut slot) => {
                        let kept = &slot.get().transport;
                        let incoming = &envelope.transport;
                        let same_message = kept.topic == incoming.topic
                            && kept.partition == incoming.partition
                            && kept.offset == incoming.offset;
                        if same_message {
                            slot.insert(envelope);
                            None
                        } else if incoming.offset < kept.offset {
                            Some(slot.insert(envelope))
                        } else {
                            Some(envelope)
                        }
                    }
                };
                (displaced, parked.len())
            }
            Err(_) => return None,
        };
        metrics::set_retry_queue_depth(depth);
        displaced
    }

    pub fn len(&self) -> usize {
        self.parked.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim due events from the ledger and hand back their envelopes, oldest
    /// eligibility first.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>, InfrastructureError> {
        let ids = self.ledger.due_for_retry(now).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (due, orphaned, depth) = {
            let mut parked = self
                .parked
                .lock()
                .map_err(|e| InfrastructureError::Ledger(e.to_string()))?;
            let mut due = Vec::with_capacity(ids.len());
            let mut orphaned = Vec::new();
            for id in ids {
                match parked.remove(&id) {
                    Some(envelope) => due.push(envelope),
                    None => orphaned.push(id),
                }
            }
            (due, orphaned, parked.len())
        };

        // Still uncommitted, so the broker redelivers it; the record stays claimable
        for id in orphaned {
            tracing::debug!(event_id = %id, "Due event has no parked envelope");
            self.ledger.release(&id).await?;
        }

        metrics::set_retry_queue_depth(depth);
        Ok(due)
    }

    /// Give back a claimed envelope that could not be handed to a worker.
    /// Returns a redelivered copy displaced by it, as `park` does.
    pub async fn unclaim(
        &self,
        envelope: EventEnvelope,
    ) -> Result<Option<EventEnvelope>, InfrastructureError> {
        self.ledger.release(envelope.event_id()).await?;
        Ok(self.park(envelope))
    }
}
