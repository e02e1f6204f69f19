//! Freshness store: the single source of truth for which products are stale.
//!
//! Two implementations share the [`FreshnessStore`] contract: a PostgreSQL
//! store for deployments and a lock-sharded in-memory store used by tests
//! and local runs. Both guarantee per-key atomic updates; neither holds a
//! store-wide lock across calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::db::queries;
use crate::models::product::{is_stale_at, FreshnessRecord, ProductData, ProductKey};

#[async_trait]
pub trait FreshnessStore: Send + Sync {
    /// Freshness record of one product, if known.
    async fn record(&self, key: &ProductKey) -> Result<Option<FreshnessRecord>, StoreError>;

    /// True when the product is unknown, never renewed, or at least `ttl` old.
    async fn is_stale(
        &self,
        key: &ProductKey,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let renewed = self.record(key).await?.and_then(|r| r.last_renewed_at);
        Ok(is_stale_at(renewed, now, ttl))
    }

    async fn has_stale_data(&self, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError>;

    async fn count_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Result<u64, StoreError>;

    /// Known keys that are stale, in insertion order.
    async fn stale_keys(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ProductKey>, StoreError>;

    /// All known keys in insertion order.
    async fn all_keys(&self) -> Result<Vec<ProductKey>, StoreError>;

    /// Make keys known as never renewed; existing records are untouched.
    /// Returns how many keys were new.
    async fn register(&self, keys: &[ProductKey]) -> Result<u64, StoreError>;

    async fn mark_renewed(&self, key: &ProductKey, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Save fetched data and mark the product renewed in one update.
    async fn store_product(
        &self,
        key: &ProductKey,
        data: &ProductData,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn product(&self, key: &ProductKey) -> Result<Option<ProductData>, StoreError>;

    /// Mark every record as never renewed. Returns the number of records.
    async fn reset_all(&self) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// PostgreSQL-backed store over the `product_store` table.
pub struct PgFreshnessStore {
    pool: PgPool,
}

impl PgFreshnessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FreshnessStore for PgFreshnessStore {
    async fn record(&self, key: &ProductKey) -> Result<Option<FreshnessRecord>, StoreError> {
        Ok(queries::get_record(&self.pool, key).await?)
    }

    async fn has_stale_data(&self, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError> {
        Ok(queries::has_stale(&self.pool, now - ttl).await?)
    }

    async fn count_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Result<u64, StoreError> {
        Ok(queries::count_stale(&self.pool, now - ttl).await?)
    }

    async fn stale_keys(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ProductKey>, StoreError> {
        Ok(queries::stale_keys(&self.pool, now - ttl).await?)
    }

    async fn all_keys(&self) -> Result<Vec<ProductKey>, StoreError> {
        Ok(queries::all_keys(&self.pool).await?)
    }

    async fn register(&self, keys: &[ProductKey]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(queries::register_products(&self.pool, keys).await?)
    }

    async fn mark_renewed(&self, key: &ProductKey, now: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(queries::mark_renewed(&self.pool, key, now).await?)
    }

    async fn store_product(
        &self,
        key: &ProductKey,
        data: &ProductData,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(queries::store_product(&self.pool, key, data, now).await?)
    }

    async fn product(&self, key: &ProductKey) -> Result<Option<ProductData>, StoreError> {
        Ok(queries::get_product(&self.pool, key).await?)
    }

    async fn reset_all(&self) -> Result<u64, StoreError> {
        let reset = queries::reset_all(&self.pool).await?;
        tracing::info!(products = reset, "Reset all renewal times");
        Ok(reset)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    seq: u64,
    renewed_at: Option<DateTime<Utc>>,
    data: Option<ProductData>,
}

/// In-process store; each key lives in its own shard entry.
#[derive(Default)]
pub struct MemoryFreshnessStore {
    records: DashMap<ProductKey, MemoryRecord>,
    next_seq: AtomicU64,
}

impl MemoryFreshnessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_record(&self, renewed_at: Option<DateTime<Utc>>, data: Option<ProductData>) -> MemoryRecord {
        MemoryRecord {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            renewed_at,
            data,
        }
    }

    fn keys_where(&self, keep: impl Fn(&MemoryRecord) -> bool) -> Vec<ProductKey> {
        let mut keys: Vec<(u64, ProductKey)> = self
            .records
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        keys.sort_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, key)| key).collect()
    }
}

#[async_trait]
impl FreshnessStore for MemoryFreshnessStore {
    async fn record(&self, key: &ProductKey) -> Result<Option<FreshnessRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| FreshnessRecord {
            key: key.clone(),
            last_renewed_at: r.renewed_at,
        }))
    }

    async fn has_stale_data(&self, now: DateTime<Utc>, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self
            .records
            .iter()
            .any(|r| is_stale_at(r.renewed_at, now, ttl)))
    }

    async fn count_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Result<u64, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| is_stale_at(r.renewed_at, now, ttl))
            .count() as u64)
    }

    async fn stale_keys(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<ProductKey>, StoreError> {
        Ok(self.keys_where(|r| is_stale_at(r.renewed_at, now, ttl)))
    }

    async fn all_keys(&self) -> Result<Vec<ProductKey>, StoreError> {
        Ok(self.keys_where(|_| true))
    }

    async fn register(&self, keys: &[ProductKey]) -> Result<u64, StoreError> {
        let mut added = 0;
        for key in keys {
            if let Entry::Vacant(slot) = self.records.entry(key.clone()) {
                slot.insert(self.new_record(None, None));
                added += 1;
            }
        }
        Ok(added)
    }

    async fn mark_renewed(&self, key: &ProductKey, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.records
            .entry(key.clone())
            .and_modify(|r| r.renewed_at = Some(now))
            .or_insert_with(|| self.new_record(Some(now), None));
        Ok(())
    }

    async fn store_product(
        &self,
        key: &ProductKey,
        data: &ProductData,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.records
            .entry(key.clone())
            .and_modify(|r| {
                r.renewed_at = Some(now);
                r.data = Some(data.clone());
            })
            .or_insert_with(|| self.new_record(Some(now), Some(data.clone())));
        Ok(())
    }

    async fn product(&self, key: &ProductKey) -> Result<Option<ProductData>, StoreError> {
        Ok(self.records.get(key).and_then(|r| r.data.clone()))
    }

    async fn reset_all(&self) -> Result<u64, StoreError> {
        let mut reset = 0;
        for mut record in self.records.iter_mut() {
            record.renewed_at = None;
            reset += 1;
        }
        Ok(reset)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
