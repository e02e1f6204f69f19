use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::queue::{QueueError, RenewalQueue};
use crate::models::queue::{ClaimedItem, QueueDepth, QueueItem};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    /// Active claims by receipt.
    claims: HashMap<Uuid, ClaimedItem>,
}

impl QueueState {
    fn requeue_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<Uuid> = self
            .claims
            .values()
            .filter(|c| c.lease_expires_at <= now)
            .map(|c| c.receipt)
            .collect();

        for receipt in expired {
            if let Some(claim) = self.claims.remove(&receipt) {
                tracing::warn!(
                    product_key = %claim.item.key,
                    item_id = %claim.item.id,
                    "Claim lease expired, returning item to queue"
                );
                self.pending.push_back(claim.item);
            }
        }
    }
}

/// In-process renewal queue. Each operation takes the lock briefly; no lock
/// is held between a claim and its settlement.
pub struct MemoryRenewalQueue {
    state: Mutex<QueueState>,
    lease: Duration,
}

impl MemoryRenewalQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease,
        }
    }

    /// Snapshot of the pending items, head first.
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    fn take_claim(state: &mut QueueState, claim: &ClaimedItem) -> Result<ClaimedItem, QueueError> {
        state
            .claims
            .remove(&claim.receipt)
            .ok_or(QueueError::NotClaimed { item_id: claim.item.id })
    }
}

#[async_trait]
impl RenewalQueue for MemoryRenewalQueue {
    async fn push(&self, item: QueueItem) -> Result<QueueItem, QueueError> {
        self.state.lock().await.pending.push_back(item.clone());
        Ok(item)
    }

    async fn claim(&self) -> Result<Option<ClaimedItem>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.requeue_expired(now);

        let Some(item) = state.pending.pop_front() else {
            return Ok(None);
        };

        let claim = ClaimedItem {
            item,
            receipt: Uuid::new_v4(),
            lease_expires_at: now + self.lease,
        };
        state.claims.insert(claim.receipt, claim.clone());
        Ok(Some(claim))
    }

    async fn delete(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::take_claim(&mut state, claim)?;
        Ok(())
    }

    async fn release(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let held = Self::take_claim(&mut state, claim)?;
        state.pending.push_back(held.item.retried());
        Ok(())
    }

    async fn abandon(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::take_claim(&mut state, claim)?;
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            pending: state.pending.len() as u64,
            claimed: state.claims.len() as u64,
        })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
