use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::ProductKey;

/// A request to renew one product, as stored in the renewal queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub key: ProductKey,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    /// Renew even when the stored data is still fresh.
    #[serde(default)]
    pub forced: bool,
}

impl QueueItem {
    pub fn new(key: ProductKey, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            enqueued_at: now,
            attempts: 0,
            forced: false,
        }
    }

    /// A request that bypasses the freshness check of the worker.
    pub fn forced(self) -> Self {
        Self { forced: true, ..self }
    }

    /// The same work request after one more failed attempt.
    pub fn retried(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }
}

/// An item exclusively owned by one caller until deleted, released or
/// abandoned. `receipt` identifies this particular claim; a stale receipt
/// (after release or lease expiry) is rejected by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedItem {
    pub item: QueueItem,
    pub receipt: Uuid,
    pub lease_expires_at: DateTime<Utc>,
}

/// Outstanding work in a renewal queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub claimed: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
