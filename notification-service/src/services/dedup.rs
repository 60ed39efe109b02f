//! Record of event ids that were dispatched successfully.
//!
//! Presence means "delivered at least once". Absence proves nothing: entries
//! expire after the retention window, so dispatch must stay idempotent.

use crate::error::InfrastructureError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has(&self, event_id: &str) -> Result<bool, InfrastructureError>;
    async fn mark_processed(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfrastructureError>;
    /// Drop entries older than the retention window. Returns how many were removed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, InfrastructureError>;
    async fn health_check(&self) -> Result<(), InfrastructureError>;
}

/// Process-local store with time-based expiry.
pub struct InMemoryDedupStore {
    entries: DashMap<String, DateTime<Utc>>,
    retention: Duration,
}

impl InMemoryDedupStore {
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, processed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(processed_at) < self.retention
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn has(&self, event_id: &str) -> Result<bool, InfrastructureError> {
        let now = Utc::now();
        Ok(self
            .entries
            .get(event_id)
            .map(|entry| self.is_live(*entry, now))
            .unwrap_or(false))
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfrastructureError> {
        self.entries.insert(event_id.to_string(), at);
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, InfrastructureError> {
        let before = self.entries.len();
        self.entries
            .retain(|_, processed_at| self.is_live(*processed_at, now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        Ok(())
    }
}

/// Redis-backed store shared by every replica. Expiry is delegated to key TTLs.
#[derive(Clone)]
pub struct RedisDedupStore {
    manager: ConnectionManager,
    key_prefix: String,
    retention_secs: u64,
}

impl RedisDedupStore {
    pub async fn connect(
        url: &str,
        key_prefix: &str,
        retention: std::time::Duration,
    ) -> Result<Self, InfrastructureError> {
        tracing::info!("Connecting to Redis dedup store");
        let client = Client::open(url)
            .map_err(|e| InfrastructureError::Dedup(format!("Invalid Redis URL: {}", e)))?;

        // ConnectionManager reconnects on its own after transient failures
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            InfrastructureError::Dedup(format!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Successfully connected to Redis dedup store");

        Ok(Self {
            manager,
            key_prefix: key_prefix.to_string(),
            retention_secs: retention.as_secs().max(1),
        })
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}{}", self.key_prefix, event_id)
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn has(&self, event_id: &str) -> Result<bool, InfrastructureError> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(self.key(event_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| InfrastructureError::Dedup(format!("EXISTS failed: {}", e)))
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfrastructureError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(self.key(event_id))
            .arg(at.to_rfc3339())
            .arg("EX")
            .arg(self.retention_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| InfrastructureError::Dedup(format!("SET failed: {}", e)))
    }

    async fn evict_expired(&self, _now: DateTime<Utc>) -> Result<usize, InfrastructureError> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| InfrastructureError::Dedup(format!("Redis health check failed: {}", e)))
    }
}
