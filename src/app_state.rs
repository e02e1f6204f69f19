use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ConfigError};
use crate::db;
use crate::services::{
    coordinator::RenewalCoordinator,
    freshness::PgFreshnessStore,
    product_source::{FetchError, HttpProductSource},
    queue::{QueueError, RedisRenewalQueue},
};

/// Shared state: the coordinator and, through it, its collaborators.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RenewalCoordinator>,
}

impl AppState {
    pub fn new(coordinator: RenewalCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }

    /// Wire PostgreSQL store, Redis queue and HTTP product source from
    /// configuration.
    pub async fn connect(config: &AppConfig) -> Result<Self, StartupError> {
        let policy = config.renewal_policy()?;

        tracing::info!("Connecting to PostgreSQL product store");
        let pool = db::init_pool(&config.database_url).await?;
        db::run_migrations(&pool).await?;

        tracing::info!(queue = %config.queue_name, "Connecting to Redis renewal queue");
        let queue = RedisRenewalQueue::new(&config.redis_url, &config.queue_name, policy.claim_lease)?;

        let source = HttpProductSource::new(
            &config.product_api_url,
            config.product_api_token.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        )?;

        Ok(Self::new(RenewalCoordinator::new(
            Arc::new(PgFreshnessStore::new(pool)),
            Arc::new(queue),
            Arc::new(source),
            policy,
        )))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Product source setup failed: {0}")]
    Source(#[from] FetchError),
}
