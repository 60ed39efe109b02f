use super::{ChannelError, DispatchReceipt, NotificationDispatcher};
use crate::models::{Channel, EventEnvelope};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Dispatcher with scripted results, for tests and local runs.
///
/// Each call pops the next scripted result; once the script is empty every
/// call succeeds.
pub struct MockDispatcher {
    script: Mutex<VecDeque<Result<(), ChannelError>>>,
    delay: Option<Duration>,
    send_count: AtomicU64,
    sent: Mutex<Vec<String>>,
    healthy: AtomicBool,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            delay: None,
            send_count: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Fail with each error in turn, then succeed.
    pub fn failing_with(errors: Vec<ChannelError>) -> Self {
        let dispatcher = Self::new();
        if let Ok(mut script) = dispatcher.script.lock() {
            script.extend(errors.into_iter().map(Err));
        }
        dispatcher
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Event ids that were delivered successfully, in call order.
    pub fn delivered(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for MockDispatcher {
    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError> {
        let call = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(Ok(()));

        next?;

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(envelope.event_id().to_string());
        }

        tracing::info!(
            event_id = %envelope.event_id(),
            "[MOCK] Notification would be sent"
        );

        Ok(DispatchReceipt::new(Some(format!("mock-{}", call))))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Unavailable("mock provider down".to_string()))
        }
    }
}
