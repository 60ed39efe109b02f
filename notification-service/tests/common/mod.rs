#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_service::consumer::{ConsumerError, InboundMessage, MessageSource};
use notification_service::error::InfrastructureError;
use notification_service::models::{decode, EventEnvelope, TransportMetadata};
use notification_service::services::{
    BackoffPolicy, DedupStore, EventProcessor, InMemoryDeadLetterSink, InMemoryDedupStore,
    InMemoryRetryLedger, MockDispatcher, ProcessorSettings,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOPIC: &str = "orders.created";

pub fn payload(event_id: &str) -> Vec<u8> {
    format!(
        r#"{{"eventId":"{}","orderId":"o1","userId":"u1","total":42.50,"currency":"USD","createdAt":"2024-01-01T00:00:00Z"}}"#,
        event_id
    )
    .into_bytes()
}

pub fn transport(partition: i32, offset: i64) -> TransportMetadata {
    TransportMetadata {
        topic: TOPIC.to_string(),
        partition,
        offset,
        received_at: Utc::now(),
    }
}

pub fn envelope(event_id: &str) -> EventEnvelope {
    decode(Some(&payload(event_id)), transport(0, 0)).expect("valid test payload")
}

pub fn message(event_id: &str, partition: i32, offset: i64) -> InboundMessage {
    InboundMessage {
        topic: TOPIC.to_string(),
        partition,
        offset,
        payload: Some(payload(event_id)),
        received_at: Utc::now(),
    }
}

/// Backoff short enough for tests, without jitter.
pub fn fast_settings(max_attempts: u32) -> ProcessorSettings {
    ProcessorSettings {
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 0.0),
        max_attempts,
        dispatch_timeout: Duration::from_secs(1),
    }
}

/// Processor wired to in-memory stores, with handles kept for assertions.
pub struct Harness {
    pub processor: Arc<EventProcessor>,
    pub dedup: Arc<InMemoryDedupStore>,
    pub ledger: Arc<InMemoryRetryLedger>,
    pub sink: Arc<InMemoryDeadLetterSink>,
    pub dispatcher: Arc<MockDispatcher>,
}

impl Harness {
    pub fn new(dispatcher: MockDispatcher, settings: ProcessorSettings) -> Self {
        Self::with_dedup(
            Arc::new(InMemoryDedupStore::new(Duration::from_secs(3600))),
            dispatcher,
            settings,
        )
    }

    pub fn with_dedup(
        dedup: Arc<InMemoryDedupStore>,
        dispatcher: MockDispatcher,
        settings: ProcessorSettings,
    ) -> Self {
        let ledger = Arc::new(InMemoryRetryLedger::new(Duration::from_secs(3600)));
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let dispatcher = Arc::new(dispatcher);
        let processor = Arc::new(EventProcessor::new(
            dedup.clone(),
            ledger.clone(),
            sink.clone(),
            dispatcher.clone(),
            settings,
        ));
        Self {
            processor,
            dedup,
            ledger,
            sink,
            dispatcher,
        }
    }
}

/// Message source fed from the test, recording every commit.
pub struct InMemorySource {
    sender: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    commits: Mutex<Vec<(String, i32, i64)>>,
    healthy: AtomicBool,
    closed: AtomicBool,
}

impl InMemorySource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            commits: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, message: InboundMessage) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(message).unwrap();
        }
    }

    /// No more messages; `next_message` returns `None` once drained.
    pub fn end(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.lock().unwrap().clone()
    }

    /// Highest committed position for a partition.
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.commits()
            .into_iter()
            .filter(|(_, p, _)| *p == partition)
            .map(|(_, _, offset)| offset)
            .max()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn next_message(&self) -> Result<Option<InboundMessage>, ConsumerError> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), ConsumerError> {
        self.commits
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, next_offset));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConsumerError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConsumerError::Broker("broker unreachable".to_string()))
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Dedup store whose first `failures` calls fail as if the backend were down.
pub struct FlakyDedupStore {
    inner: InMemoryDedupStore,
    failures: AtomicU32,
}

impl FlakyDedupStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryDedupStore::new(Duration::from_secs(3600)),
            failures: AtomicU32::new(failures),
        }
    }

    fn fail(&self) -> Result<(), InfrastructureError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(InfrastructureError::Dedup("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for FlakyDedupStore {
    async fn has(&self, event_id: &str) -> Result<bool, InfrastructureError> {
        self.fail()?;
        self.inner.has(event_id).await
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfrastructureError> {
        self.fail()?;
        self.inner.mark_processed(event_id, at).await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, InfrastructureError> {
        self.inner.evict_expired(now).await
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            return Err(InfrastructureError::Dedup("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
