use chrono::{Duration, Utc};
use std::sync::Arc;

use super::freshness::{FreshnessStore, StoreError};
use super::product_source::ProductSource;
use crate::models::product::ProductKey;
use crate::models::queue::QueueItem;
use crate::models::renewal::ItemOutcome;

/// Renews a single product: fetch fresh data, store it, report the outcome.
pub struct QueueWorker {
    store: Arc<dyn FreshnessStore>,
    source: Arc<dyn ProductSource>,
    ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The store itself failed; processing cannot continue.
    #[error("Product store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Product source returned no data for {0}")]
    MissingProduct(ProductKey),
}

impl QueueWorker {
    pub fn new(store: Arc<dyn FreshnessStore>, source: Arc<dyn ProductSource>, ttl: Duration) -> Self {
        Self { store, source, ttl }
    }

    /// Process one queue item.
    ///
    /// Fetch errors become outcomes; only store failures and products the
    /// source does not know come back as errors.
    pub async fn process_item(&self, item: &QueueItem) -> Result<ItemOutcome, WorkerError> {
        let key = &item.key;

        // Duplicate requests for an already renewed product are no-ops.
        if !item.forced && !self.store.is_stale(key, Utc::now(), self.ttl).await? {
            tracing::debug!(product_key = %key, "Product already fresh, skipping fetch");
            return Ok(ItemOutcome::Success);
        }

        let mut products = match self.source.fetch(std::slice::from_ref(key)).await {
            Ok(products) => products,
            Err(e) if e.is_suspend() => {
                tracing::warn!(product_key = %key, error = %e, "Product source asked to suspend");
                return Ok(ItemOutcome::FatalSuspend);
            }
            Err(e) => {
                tracing::warn!(
                    product_key = %key,
                    attempts = item.attempts,
                    error = %e,
                    "Product fetch failed"
                );
                return Ok(ItemOutcome::TransientFailure);
            }
        };

        let data = products
            .remove(key)
            .ok_or_else(|| WorkerError::MissingProduct(key.clone()))?;

        self.store.store_product(key, &data, Utc::now()).await?;
        tracing::info!(product_key = %key, "Product data renewed");

        Ok(ItemOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::ProductData;
    use crate::services::freshness::MemoryFreshnessStore;
    use crate::services::product_source::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Data,
        Empty,
        Throttled,
        Broken,
    }

    struct StubSource {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProductSource for StubSource {
        async fn fetch(&self, keys: &[ProductKey]) -> Result<HashMap<ProductKey, ProductData>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Data => Ok(keys.iter().map(|k| (k.clone(), ProductData::default())).collect()),
                Reply::Empty => Ok(HashMap::new()),
                Reply::Throttled => Err(FetchError::Throttled { retry_after: None }),
                Reply::Broken => Err(FetchError::Status(500)),
            }
        }
    }

    fn item(raw: &str) -> QueueItem {
        QueueItem::new(ProductKey::parse(raw).unwrap(), Utc::now())
    }

    fn worker(store: &Arc<MemoryFreshnessStore>, source: &Arc<StubSource>) -> QueueWorker {
        QueueWorker::new(store.clone(), source.clone(), Duration::days(1))
    }

    #[tokio::test]
    async fn test_success_marks_product_renewed() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Data);
        let item = item("A1");

        let outcome = worker(&store, &source).process_item(&item).await.unwrap();

        assert_eq!(outcome, ItemOutcome::Success);
        assert!(!store.is_stale(&item.key, Utc::now(), Duration::days(1)).await.unwrap());
        assert!(store.product(&item.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fresh_product_is_not_fetched() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Broken);
        let item = item("A1");
        store.mark_renewed(&item.key, Utc::now()).await.unwrap();

        let outcome = worker(&store, &source).process_item(&item).await.unwrap();

        assert_eq!(outcome, ItemOutcome::Success);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_throttling_suspends_without_touching_store() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Throttled);
        let item = item("A1");

        let outcome = worker(&store, &source).process_item(&item).await.unwrap();

        assert_eq!(outcome, ItemOutcome::FatalSuspend);
        assert!(store.record(&item.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_fetch_errors_are_transient() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Broken);

        let outcome = worker(&store, &source).process_item(&item("A1")).await.unwrap();
        assert_eq!(outcome, ItemOutcome::TransientFailure);
    }

    #[tokio::test]
    async fn test_unknown_product_is_an_error() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Empty);

        let err = worker(&store, &source).process_item(&item("A1")).await.unwrap_err();
        assert!(matches!(err, WorkerError::MissingProduct(ref key) if key.as_str() == "A1"));
    }

    #[tokio::test]
    async fn test_forced_item_is_fetched_even_when_fresh() {
        let store = Arc::new(MemoryFreshnessStore::new());
        let source = StubSource::new(Reply::Data);
        let item = item("A1").forced();
        let renewed_at = Utc::now() - Duration::hours(1);
        store.mark_renewed(&item.key, renewed_at).await.unwrap();

        let outcome = worker(&store, &source).process_item(&item).await.unwrap();

        assert_eq!(outcome, ItemOutcome::Success);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let record = store.record(&item.key).await.unwrap().unwrap();
        assert!(record.last_renewed_at.unwrap() > renewed_at);
    }
}
