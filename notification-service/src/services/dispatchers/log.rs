use super::{ChannelError, DispatchReceipt, NotificationDispatcher};
use crate::models::{Channel, EventEnvelope};
use async_trait::async_trait;

/// Logs the event instead of contacting a provider. Never fails.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError> {
        let event = &envelope.event;
        tracing::info!(
            event_id = %event.event_id,
            order_id = %event.order_id,
            user_id = %event.user_id,
            "Received order.created"
        );
        Ok(DispatchReceipt::new(None))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
