//! The consumption loop: pull, route to partition workers, retry, drain.

use super::offsets::CommitCoordinator;
use super::retry_queue::RetryQueue;
use super::shutdown::ShutdownController;
use super::source::MessageSource;
use super::worker::{InfraRetry, PartitionWorker, WorkItem};
use crate::config::NotificationConfig;
use crate::services::ledger::RetryLedger;
use crate::services::metrics;
use crate::services::processor::EventProcessor;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

const BROKER_ERROR_PAUSE: Duration = Duration::from_secs(1);
const ABORT_SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub partition_queue_depth: usize,
    pub shutdown_grace: Duration,
    pub retry_poll_interval: Duration,
    pub housekeeping_interval: Duration,
    pub infra_retry: InfraRetry,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            partition_queue_depth: 64,
            shutdown_grace: Duration::from_secs(30),
            retry_poll_interval: Duration::from_millis(250),
            housekeeping_interval: Duration::from_secs(60),
            infra_retry: InfraRetry::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            partition_queue_depth: config.pipeline.partition_queue_depth,
            shutdown_grace: config.pipeline.shutdown_grace(),
            retry_poll_interval: config.retry.poll_interval(),
            housekeeping_interval: config.pipeline.housekeeping_interval(),
            infra_retry: InfraRetry::default(),
        }
    }
}

pub struct ConsumptionLoop {
    source: Arc<dyn MessageSource>,
    processor: Arc<EventProcessor>,
    commits: Arc<CommitCoordinator>,
    retry_queue: Arc<RetryQueue>,
    shutdown: ShutdownController,
    settings: PipelineSettings,
}

impl ConsumptionLoop {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<EventProcessor>,
        ledger: Arc<dyn RetryLedger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            commits: Arc::new(CommitCoordinator::new(source.clone())),
            retry_queue: Arc::new(RetryQueue::new(ledger)),
            source,
            processor,
            shutdown: ShutdownController::new(),
            settings,
        }
    }

    /// Handle for triggering and observing shutdown.
    pub fn shutdown_controller(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested or the source closes, then drain.
    pub async fn run(self) {
        let drain = self.shutdown.drain_token();
        let mut routes: HashMap<i32, mpsc::Sender<WorkItem>> = HashMap::new();
        let mut workers = JoinSet::new();

        let housekeeping = self.spawn_housekeeping();

        let mut retry_tick = tokio::time::interval(self.settings.retry_poll_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Consumption loop started");

        loop {
            tokio::select! {
                biased;
                _ = drain.cancelled() => break,
                _ = retry_tick.tick() => {
                    self.dispatch_due_retries(&mut routes, &mut workers).await;
                }
                next = self.source.next_message() => match next {
                    Ok(Some(message)) => {
                        self.commits
                            .track(&message.topic, message.partition, message.offset)
                            .await;
                        self.route(&mut routes, &mut workers, WorkItem::Message(message))
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!("Message source closed");
                        break;
                    }
                    Err(e) => {
                        // The client reconnects on its own; uncommitted messages come back
                        metrics::record_infrastructure_error("broker");
                        tracing::warn!(error = %e, "Broker error while polling");
                        tokio::select! {
                            _ = drain.cancelled() => break,
                            _ = tokio::time::sleep(BROKER_ERROR_PAUSE) => {}
                        }
                    }
                },
            }
        }

        drop(routes);
        self.stop(workers).await;
        housekeeping.abort();
    }

    async fn dispatch_due_retries(
        &self,
        routes: &mut HashMap<i32, mpsc::Sender<WorkItem>>,
        workers: &mut JoinSet<()>,
    ) {
        match self.retry_queue.claim_due(Utc::now()).await {
            Ok(due) => {
                for envelope in due {
                    self.route(routes, workers, WorkItem::Retry(envelope)).await;
                }
            }
            Err(e) => {
                metrics::record_infrastructure_error(e.component());
                tracing::warn!(error = %e, "Failed to poll retry ledger");
            }
        }
    }

    /// Hand an item to its partition's worker, starting one if needed. Blocks
    /// while the worker's queue is full.
    async fn route(
        &self,
        routes: &mut HashMap<i32, mpsc::Sender<WorkItem>>,
        workers: &mut JoinSet<()>,
        item: WorkItem,
    ) {
        let partition = item.partition();
        let sender = routes
            .entry(partition)
            .or_insert_with(|| self.spawn_worker(partition, workers))
            .clone();

        let drain = self.shutdown.drain_token();
        let permit = tokio::select! {
            biased;
            _ = drain.cancelled() => None,
            permit = sender.reserve() => permit.ok(),
        };
        let undelivered = match permit {
            Some(permit) => {
                permit.send(item);
                None
            }
            None => Some(item),
        };

        // Left uncommitted; parked retries go back to the queue
        if let Some(WorkItem::Retry(envelope)) = undelivered {
            match self.retry_queue.unclaim(envelope).await {
                Ok(Some(displaced)) => {
                    let redelivered = &displaced.transport;
                    self.commits
                        .resolve(&redelivered.topic, redelivered.partition, redelivered.offset)
                        .await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to return retry to queue"),
            }
        }
    }

    fn spawn_worker(&self, partition: i32, workers: &mut JoinSet<()>) -> mpsc::Sender<WorkItem> {
        let (tx, rx) = mpsc::channel(self.settings.partition_queue_depth.max(1));
        let worker = PartitionWorker {
            partition,
            processor: self.processor.clone(),
            commits: self.commits.clone(),
            retry_queue: self.retry_queue.clone(),
            infra_retry: self.settings.infra_retry.clone(),
            drain: self.shutdown.drain_token(),
            abort: self.shutdown.abort_token(),
        };
        workers.spawn(worker.run(rx));
        tx
    }

    fn spawn_housekeeping(&self) -> tokio::task::JoinHandle<()> {
        let processor = self.processor.clone();
        let drain = self.shutdown.drain_token();
        let mut ticker = tokio::time::interval(self.settings.housekeeping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain.cancelled() => break,
                    _ = ticker.tick() => match processor.evict_expired(Utc::now()).await {
                        Ok((evicted, purged)) => {
                            if evicted + purged > 0 {
                                tracing::debug!(evicted = evicted, purged = purged, "Housekeeping removed expired entries");
                            }
                        }
                        Err(e) => {
                            metrics::record_infrastructure_error(e.component());
                            tracing::warn!(error = %e, "Housekeeping failed");
                        }
                    },
                }
            }
        })
    }

    async fn stop(&self, mut workers: JoinSet<()>) {
        self.shutdown.begin_drain();
        tracing::info!(
            grace_ms = self.settings.shutdown_grace.as_millis() as u64,
            "Waiting for in-flight messages"
        );

        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!("Grace period expired");
            self.shutdown.abort();
            let settled = tokio::time::timeout(ABORT_SETTLE, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if settled.is_err() {
                workers.abort_all();
            }
        }

        self.commits.flush().await;
        self.source.close().await;
        self.shutdown.mark_stopped();
    }
}
