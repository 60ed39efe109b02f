use super::DeadLetterSink;
use crate::config::KafkaConfig;
use crate::error::InfrastructureError;
use crate::models::DeadLetterRecord;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes dead letters to a Kafka topic, keyed by event id.
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    /// Configuration:
    /// - `acks=all` and `enable.idempotence=true`: a dead letter must not be lost.
    /// - `message.timeout.ms` bounds a write so failures surface to the caller.
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<Self, InfrastructureError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", format!("{}-dlq", config.client_id))
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "30000")
            .set("request.timeout.ms", config.request_timeout_ms.to_string())
            .set("reconnect.backoff.ms", config.reconnect_backoff_ms.to_string())
            .create()
            .map_err(|e| {
                InfrastructureError::DeadLetter(format!("Failed to create Kafka producer: {}", e))
            })?;

        tracing::info!(topic = %topic, "Kafka dead-letter producer initialized");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), InfrastructureError> {
        let payload = serde_json::to_vec(record).map_err(|e| {
            InfrastructureError::DeadLetter(format!("Failed to serialize dead letter: {}", e))
        })?;

        let kafka_record = FutureRecord::to(&self.topic)
            .key(record.event_id.as_bytes())
            .payload(&payload);

        match self
            .producer
            .send(kafka_record, Timeout::After(SEND_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => {
                tracing::info!(
                    event_id = %record.event_id,
                    topic = %self.topic,
                    partition = partition,
                    offset = offset,
                    "Dead letter published"
                );
                Ok(())
            }
            Err((kafka_err, _)) => Err(InfrastructureError::DeadLetter(format!(
                "Failed to publish dead letter to {}: {}",
                self.topic, kafka_err
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(Duration::from_secs(2)))
                .map(|_| ())
        })
        .await
        .map_err(|e| InfrastructureError::DeadLetter(e.to_string()))?
        .map_err(|e| InfrastructureError::DeadLetter(format!("Kafka metadata unavailable: {}", e)))
    }
}
