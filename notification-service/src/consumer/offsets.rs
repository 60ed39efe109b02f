//! Commit watermarks per partition.
//!
//! Messages parked for retry stay outstanding while later offsets complete.
//! The committable position is the lowest outstanding offset, or one past the
//! highest offset seen when nothing is outstanding. A commit never skips an
//! unresolved message.

use super::source::MessageSource;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct PartitionOffsets {
    outstanding: BTreeSet<i64>,
    highest_seen: Option<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    pub fn track(&mut self, offset: i64) {
        self.outstanding.insert(offset);
        self.highest_seen = Some(self.highest_seen.map_or(offset, |h| h.max(offset)));
    }

    pub fn resolve(&mut self, offset: i64) {
        self.outstanding.remove(&offset);
    }

    pub fn watermark(&self) -> Option<i64> {
        match self.outstanding.first() {
            Some(lowest) => Some(*lowest),
            None => self.highest_seen.map(|h| h + 1),
        }
    }

    /// Watermark to commit, if it moved past the last commit.
    pub fn pending_commit(&self) -> Option<i64> {
        let watermark = self.watermark()?;
        match self.committed {
            Some(committed) if committed >= watermark => None,
            _ => Some(watermark),
        }
    }

    pub fn mark_committed(&mut self, offset: i64) {
        self.committed = Some(self.committed.map_or(offset, |c| c.max(offset)));
    }
}

type PartitionKey = (String, i32);

/// Tracks offsets for every partition and commits watermarks to the source.
pub struct CommitCoordinator {
    source: Arc<dyn MessageSource>,
    partitions: Mutex<HashMap<PartitionKey, PartitionOffsets>>,
}

impl CommitCoordinator {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a message as received and not yet resolved.
    pub async fn track(&self, topic: &str, partition: i32, offset: i64) {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .track(offset);
    }

    /// Record a terminal outcome and commit the partition's watermark if it advanced.
    ///
    /// The lock is held across the commit so watermarks reach the broker in order.
    pub async fn resolve(&self, topic: &str, partition: i32, offset: i64) {
        let mut partitions = self.partitions.lock().await;
        let Some(offsets) = partitions.get_mut(&(topic.to_string(), partition)) else {
            return;
        };
        offsets.resolve(offset);

        if let Some(next) = offsets.pending_commit() {
            match self.source.commit(topic, partition, next).await {
                Ok(()) => {
                    offsets.mark_committed(next);
                    tracing::debug!(topic = %topic, partition = partition, offset = next, "Committed offset");
                }
                Err(e) => {
                    // Retried with the next resolution on this partition
                    tracing::warn!(topic = %topic, partition = partition, offset = next, error = %e, "Offset commit failed");
                }
            }
        }
    }

    /// Commit every partition whose watermark moved. Used while stopping.
    pub async fn flush(&self) {
        let mut partitions = self.partitions.lock().await;
        for ((topic, partition), offsets) in partitions.iter_mut() {
            if let Some(next) = offsets.pending_commit() {
                match self.source.commit(topic, *partition, next).await {
                    Ok(()) => offsets.mark_committed(next),
                    Err(e) => tracing::warn!(
                        topic = %topic,
                        partition = *partition,
                        offset = next,
                        error = %e,
                        "Final offset commit failed"
                    ),
                }
            }
        }
    }
}
