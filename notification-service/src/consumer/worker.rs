//! One sequential worker per topic partition.

use super::offsets::CommitCoordinator;
use super::retry_queue::RetryQueue;
use super::source::InboundMessage;
use crate::error::ProcessingError;
use crate::models::{ErrorClass, EventEnvelope, Outcome, TransportMetadata};
use crate::services::metrics;
use crate::services::processor::EventProcessor;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum WorkItem {
    /// Fresh from the topic.
    Message(InboundMessage),
    /// Claimed from the retry queue.
    Retry(EventEnvelope),
}

impl WorkItem {
    pub fn partition(&self) -> i32 {
        match self {
            WorkItem::Message(message) => message.partition,
            WorkItem::Retry(envelope) => envelope.transport.partition,
        }
    }
}

/// Backoff for store and sink outages. These never count as a notification attempt.
#[derive(Debug, Clone)]
pub struct InfraRetry {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for InfraRetry {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }
}

pub struct PartitionWorker {
    pub partition: i32,
    pub processor: Arc<EventProcessor>,
    pub commits: Arc<CommitCoordinator>,
    pub retry_queue: Arc<RetryQueue>,
    pub infra_retry: InfraRetry,
    pub drain: CancellationToken,
    pub abort: CancellationToken,
}

impl PartitionWorker {
    pub async fn run(self, mut items: mpsc::Receiver<WorkItem>) {
        tracing::info!(partition = self.partition, "Partition worker started");

        loop {
            let item = tokio::select! {
                biased;
                _ = self.drain.cancelled() => break,
                item = items.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    tracing::warn!(
                        partition = self.partition,
                        "In-flight message abandoned; it stays uncommitted for redelivery"
                    );
                    break;
                }
                _ = self.handle(item) => {}
            }
        }

        tracing::info!(partition = self.partition, "Partition worker stopped");
    }

    async fn handle(&self, item: WorkItem) {
        match item {
            WorkItem::Message(message) => {
                let transport = message.transport();
                let processed = self
                    .with_infra_retry(&transport, || {
                        self.processor
                            .process_payload(message.payload.as_deref(), message.transport())
                    })
                    .await;

                if let Ok(processed) = processed {
                    self.finish(&transport, processed.outcome, processed.envelope)
                        .await;
                }
            }
            WorkItem::Retry(envelope) => {
                let transport = envelope.transport.clone();
                let outcome = self
                    .with_infra_retry(&transport, || self.processor.process(&envelope))
                    .await;

                if let Ok(outcome) = outcome {
                    self.finish(&transport, outcome, Some(envelope)).await;
                }
            }
        }
    }

    async fn finish(
        &self,
        transport: &TransportMetadata,
        outcome: Outcome,
        envelope: Option<EventEnvelope>,
    ) {
        if outcome.is_terminal() {
            self.commits
                .resolve(&transport.topic, transport.partition, transport.offset)
                .await;
        } else if let Some(envelope) = envelope {
            // A redelivery of a parked event is settled by the parked copy
            if let Some(displaced) = self.retry_queue.park(envelope) {
                let redelivered = &displaced.transport;
                tracing::debug!(
                    event_id = %displaced.event_id(),
                    partition = redelivered.partition,
                    offset = redelivered.offset,
                    "Redelivery folded into parked retry"
                );
                self.commits
                    .resolve(&redelivered.topic, redelivered.partition, redelivered.offset)
                    .await;
            }
        }
    }

    /// Run `op` until it reaches an outcome, backing off on infrastructure
    /// errors. Only cancellation ends the loop early.
    async fn with_infra_retry<T, F, Fut>(
        &self,
        transport: &TransportMetadata,
        op: F,
    ) -> Result<T, ProcessingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProcessingError>>,
    {
        let backoff = ExponentialBackoff {
            initial_interval: self.infra_retry.initial_interval,
            max_interval: self.infra_retry.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };

        let op = &op;
        retry_notify(
            backoff,
            || async move { op().await.map_err(backoff::Error::transient) },
            |e: ProcessingError, wait: Duration| {
                metrics::record_infrastructure_error(e.component());
                tracing::warn!(
                    partition = transport.partition,
                    offset = transport.offset,
                    component = e.component(),
                    error_class = %ErrorClass::Infrastructure,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Infrastructure error, pausing worker"
                );
            },
        )
        .await
    }
}
