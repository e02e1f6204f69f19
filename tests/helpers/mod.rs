//! Test helpers: a scripted product source and in-memory wiring.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use product_renewal::config::RenewalPolicy;
use product_renewal::models::product::{FreshnessRecord, ProductData, ProductKey};
use product_renewal::services::coordinator::RenewalCoordinator;
use product_renewal::services::freshness::{FreshnessStore, MemoryFreshnessStore, StoreError};
use product_renewal::services::memory_queue::MemoryRenewalQueue;
use product_renewal::services::product_source::{FetchError, ProductSource};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// What the scripted source answers for one fetch call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return catalog data for every requested key it knows.
    Catalog,
    Throttle,
    Fail,
}

/// Product source answering from a fixed catalog, with optionally scripted
/// replies for the next calls.
#[derive(Default)]
pub struct ScriptedSource {
    catalog: HashMap<ProductKey, ProductData>,
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Vec<ProductKey>>>,
}

impl ScriptedSource {
    pub fn with_catalog(products: impl IntoIterator<Item = (ProductKey, ProductData)>) -> Self {
        Self {
            catalog: products.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Queue replies for the next fetch calls; afterwards the catalog answers.
    pub fn then(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script.lock().unwrap().extend(replies);
        self
    }

    pub fn calls(&self) -> Vec<Vec<ProductKey>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProductSource for ScriptedSource {
    async fn fetch(&self, keys: &[ProductKey]) -> Result<HashMap<ProductKey, ProductData>, FetchError> {
        self.calls.lock().unwrap().push(keys.to_vec());
        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Catalog);

        match reply {
            Reply::Catalog => Ok(keys
                .iter()
                .filter_map(|k| self.catalog.get(k).map(|d| (k.clone(), d.clone())))
                .collect()),
            Reply::Throttle => Err(FetchError::Throttled { retry_after: Some(60) }),
            Reply::Fail => Err(FetchError::Status(502)),
        }
    }
}

/// Coordinator over in-memory backends, keeping handles for assertions.
pub struct Harness {
    pub store: Arc<MemoryFreshnessStore>,
    pub queue: Arc<MemoryRenewalQueue>,
    pub source: Arc<ScriptedSource>,
    pub coordinator: RenewalCoordinator,
}

impl Harness {
    pub fn new(source: ScriptedSource, policy: RenewalPolicy) -> Self {
        let store = Arc::new(MemoryFreshnessStore::new());
        let queue = Arc::new(MemoryRenewalQueue::new(policy.claim_lease));
        let source = Arc::new(source);
        let coordinator = RenewalCoordinator::new(store.clone(), queue.clone(), source.clone(), policy);
        Self {
            store,
            queue,
            source,
            coordinator,
        }
    }
}

/// In-memory store whose product writes fail, as if the database went away
/// in the middle of a drain.
#[derive(Default)]
pub struct FailingWrites {
    pub inner: MemoryFreshnessStore,
}

#[async_trait]
impl FreshnessStore for FailingWrites {
    async fn record(&self, key: &ProductKey) -> Result<Option<FreshnessRecord>, StoreError> {
        self.inner.record(key).await
    }

    async fn has_stale_data(&self, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.has_stale_data(now, ttl).await
    }

    async fn count_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Result<u64, StoreError> {
        self.inner.count_stale(now, ttl).await
    }

    async fn stale_keys(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ProductKey>, StoreError> {
        self.inner.stale_keys(now, ttl).await
    }

    async fn all_keys(&self) -> Result<Vec<ProductKey>, StoreError> {
        self.inner.all_keys().await
    }

    async fn register(&self, keys: &[ProductKey]) -> Result<u64, StoreError> {
        self.inner.register(keys).await
    }

    async fn mark_renewed(&self, key: &ProductKey, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.mark_renewed(key, now).await
    }

    async fn store_product(
        &self,
        _key: &ProductKey,
        _data: &ProductData,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn product(&self, key: &ProductKey) -> Result<Option<ProductData>, StoreError> {
        self.inner.product(key).await
    }

    async fn reset_all(&self) -> Result<u64, StoreError> {
        self.inner.reset_all().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub fn key(raw: &str) -> ProductKey {
    ProductKey::parse(raw).unwrap()
}
