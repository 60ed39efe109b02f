//! Where messages come from and where offsets are committed.

use crate::config::KafkaConfig;
use crate::models::TransportMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Commit failed: {0}")]
    Commit(String),
}

/// One message as read from the topic. The payload is still raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn transport(&self) -> TransportMetadata {
        TransportMetadata {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            received_at: self.received_at,
        }
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message. `Ok(None)` means the source is closed.
    async fn next_message(&self) -> Result<Option<InboundMessage>, ConsumerError>;

    /// Commit `next_offset` as the position to resume from. Returns once the
    /// commit is acknowledged.
    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), ConsumerError>;

    async fn health_check(&self) -> Result<(), ConsumerError>;

    async fn close(&self);
}

/// Kafka consumer-group member for the order-created topic.
///
/// Configuration:
/// - `enable.auto.commit=false`: offsets are committed only after a terminal outcome.
/// - `auto.offset.reset=latest`: a new group starts at the end of the topic.
/// - `reconnect.backoff.ms`: the client reconnects on its own after broker loss.
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaMessageSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, ConsumerError> {
        let brokers = config.bootstrap_servers();
        tracing::info!(
            brokers = %brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", &config.client_id)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("socket.timeout.ms", config.request_timeout_ms.to_string())
            .set("reconnect.backoff.ms", config.reconnect_backoff_ms.to_string())
            .set(
                "reconnect.backoff.max.ms",
                (config.reconnect_backoff_ms * u64::from(config.client_retries.max(1))).to_string(),
            )
            .create()
            .map_err(|e| ConsumerError::Broker(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| ConsumerError::Broker(format!("Failed to subscribe: {}", e)))?;

        tracing::info!("Kafka consumer initialized successfully");

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn next_message(&self) -> Result<Option<InboundMessage>, ConsumerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| ConsumerError::Broker(e.to_string()))?;

        Ok(Some(InboundMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
            received_at: Utc::now(),
        }))
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), ConsumerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(|e| ConsumerError::Commit(e.to_string()))?;

        // Sync commit blocks until the broker acknowledges, so a failure is seen here
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| ConsumerError::Commit(e.to_string()))?
            .map_err(|e| ConsumerError::Commit(e.to_string()))
    }

    async fn health_check(&self) -> Result<(), ConsumerError> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(&topic), Duration::from_secs(2))
                .map(|_| ())
        })
        .await
        .map_err(|e| ConsumerError::Broker(e.to_string()))?
        .map_err(|e| ConsumerError::Broker(format!("Kafka metadata unavailable: {}", e)))
    }

    async fn close(&self) {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer unsubscribed");
    }
}
