//! Renewal coordinator: the entry point used by the command layer and the
//! worker daemon.
//!
//! The coordinator is wired explicitly with its collaborators; it owns no
//! state beyond the policy. A drain is a single sequential loop: claim an
//! item, let the [`QueueWorker`] process it, then settle the claim according
//! to the outcome. Only a suspend signal, an infrastructure failure or a
//! deferred item coming back stops the loop before the queue is exhausted.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::freshness::{FreshnessStore, StoreError};
use super::product_source::{FetchError, ProductSource};
use super::queue::{QueueError, RenewalQueue};
use super::worker::{QueueWorker, WorkerError};
use crate::config::RenewalPolicy;
use crate::models::product::{InvalidProductKey, Overrides, ProductKey};
use crate::models::queue::{ClaimedItem, QueueDepth};
use crate::models::renewal::{DrainReport, DrainStop, ItemOutcome, RenewalRun};

#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    InvalidKey(#[from] InvalidProductKey),
}

pub struct RenewalCoordinator {
    store: Arc<dyn FreshnessStore>,
    queue: Arc<dyn RenewalQueue>,
    source: Arc<dyn ProductSource>,
    worker: QueueWorker,
    policy: RenewalPolicy,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<dyn FreshnessStore>,
        queue: Arc<dyn RenewalQueue>,
        source: Arc<dyn ProductSource>,
        policy: RenewalPolicy,
    ) -> Self {
        let worker = QueueWorker::new(Arc::clone(&store), Arc::clone(&source), policy.ttl);
        Self {
            store,
            queue,
            source,
            worker,
            policy,
        }
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn FreshnessStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn RenewalQueue> {
        &self.queue
    }

    /// Enqueue the given keys, or every stale key when `keys` is `None`.
    ///
    /// Explicit keys become known to the store and are forced: they are
    /// refetched even when fresh. Stops at the first failure; items enqueued
    /// before it stay.
    pub async fn queue_renewal_sweep(&self, keys: Option<&[ProductKey]>) -> Result<u64, RenewalError> {
        let mut queued = 0;
        match keys {
            Some(keys) => {
                self.store.register(keys).await?;
                for key in keys {
                    self.queue.enqueue_forced(key).await?;
                    queued += 1;
                }
            }
            None => {
                for key in self.store.stale_keys(Utc::now(), self.policy.ttl).await? {
                    self.queue.enqueue(&key).await?;
                    queued += 1;
                }
            }
        }

        tracing::info!(queued, "Queued products for renewal");
        Ok(queued)
    }

    /// Process queued items until the queue is exhausted or the source asks
    /// to suspend.
    pub async fn drain_queue(&self) -> Result<DrainReport, RenewalError> {
        let started = Instant::now();
        let mut report = DrainReport::default();
        let mut deferred = HashSet::new();

        while let Some(claim) = self.queue.claim().await? {
            if deferred.contains(&claim.item.id) {
                // The lease ran out during this drain; hand it to a later run.
                tracing::warn!(product_key = %claim.item.key, "Deferred item came back, ending drain");
                self.queue.release(&claim).await?;
                break;
            }

            match self.worker.process_item(&claim.item).await {
                Ok(outcome) => {
                    metrics::counter!("renewal_items_total", "outcome" => outcome.to_string()).increment(1);
                    if self.settle(&claim, outcome, &mut report).await? {
                        break;
                    }
                }
                Err(WorkerError::Store(e)) => {
                    tracing::error!(product_key = %claim.item.key, error = %e, "Renewal aborted");
                    if let Err(release_err) = self.queue.release(&claim).await {
                        tracing::error!(
                            product_key = %claim.item.key,
                            error = %release_err,
                            "Failed to release item, it returns when its lease expires"
                        );
                    }
                    return Err(e.into());
                }
                Err(e @ WorkerError::MissingProduct(_)) => {
                    // Left claimed: the item returns once its lease expires.
                    tracing::error!(
                        product_key = %claim.item.key,
                        lease_expires_at = %claim.lease_expires_at,
                        error = %e,
                        "Leaving queue item for a later run"
                    );
                    metrics::counter!("renewal_items_deferred_total").increment(1);
                    deferred.insert(claim.item.id);
                    report.deferred += 1;
                }
            }
        }

        metrics::histogram!("renewal_drain_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            succeeded = report.succeeded,
            released = report.released,
            abandoned = report.abandoned,
            deferred = report.deferred,
            stopped = %report.stopped,
            "Renewal queue drained"
        );
        Ok(report)
    }

    /// Settle one claim. Returns `true` when the drain must stop.
    async fn settle(
        &self,
        claim: &ClaimedItem,
        outcome: ItemOutcome,
        report: &mut DrainReport,
    ) -> Result<bool, RenewalError> {
        match outcome {
            ItemOutcome::Success => {
                self.queue.delete(claim).await?;
                report.succeeded += 1;
                Ok(false)
            }
            ItemOutcome::TransientFailure => {
                if claim.item.attempts + 1 >= self.policy.max_attempts {
                    tracing::warn!(
                        product_key = %claim.item.key,
                        attempts = claim.item.attempts + 1,
                        "Giving up on item after max attempts"
                    );
                    self.queue.abandon(claim).await?;
                    metrics::counter!("renewal_items_abandoned_total").increment(1);
                    report.abandoned += 1;
                } else {
                    self.queue.release(claim).await?;
                    report.released += 1;
                }
                Ok(false)
            }
            ItemOutcome::FatalSuspend => {
                self.queue.release(claim).await?;
                report.released += 1;
                report.stopped = DrainStop::Suspended;
                Ok(true)
            }
        }
    }

    pub async fn has_stale_data(&self) -> Result<bool, RenewalError> {
        Ok(self.store.has_stale_data(Utc::now(), self.policy.ttl).await?)
    }

    pub async fn count_stale(&self) -> Result<u64, RenewalError> {
        Ok(self.store.count_stale(Utc::now(), self.policy.ttl).await?)
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth, RenewalError> {
        Ok(self.queue.depth().await?)
    }

    pub async fn reset_all(&self) -> Result<u64, RenewalError> {
        Ok(self.store.reset_all().await?)
    }

    /// Make keys known to the store. Returns how many were new.
    pub async fn track(&self, keys: &[ProductKey]) -> Result<u64, RenewalError> {
        Ok(self.store.register(keys).await?)
    }

    /// Overrides of one product.
    ///
    /// Fresh stored data is answered from the store; otherwise the product is
    /// fetched and stored first. If that fetch fails, stale stored data is
    /// still served. `None` means the product is unknown or has no overrides.
    pub async fn get_overrides(&self, key: &ProductKey) -> Result<Option<Overrides>, RenewalError> {
        let now = Utc::now();
        let stored = self.store.product(key).await?;
        if stored.is_some() && !self.store.is_stale(key, now, self.policy.ttl).await? {
            return Ok(stored.and_then(|data| data.overrides));
        }

        match self.source.fetch(std::slice::from_ref(key)).await {
            Ok(mut products) => match products.remove(key) {
                Some(data) => {
                    self.store.store_product(key, &data, now).await?;
                    Ok(data.overrides)
                }
                None => Ok(stored.and_then(|data| data.overrides)),
            },
            Err(e) => match stored {
                Some(data) => {
                    tracing::warn!(product_key = %key, error = %e, "Serving stale product data");
                    Ok(data.overrides)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Sweep and drain when anything is stale, then report what is left.
    pub async fn run_renewal(&self) -> Result<RenewalRun, RenewalError> {
        if !self.has_stale_data().await? {
            return Ok(RenewalRun::NothingToUpdate);
        }

        let queued = self.queue_renewal_sweep(None).await?;
        let drain = self.drain_queue().await?;
        let remaining_stale = self.count_stale().await?;

        Ok(RenewalRun::Completed {
            queued,
            drain,
            remaining_stale,
        })
    }
}
