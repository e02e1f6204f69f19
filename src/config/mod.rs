use chrono::Duration;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Health/metrics bind address for the worker daemon (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the product store
    pub database_url: String,

    /// Redis connection string for the renewal queue
    pub redis_url: String,

    /// Base URL of the product data API
    pub product_api_url: String,

    /// Bearer token for the product data API
    #[serde(default)]
    pub product_api_token: Option<String>,

    /// Redis key prefix of the renewal queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Age in hours after which a product counts as stale
    #[serde(default = "default_renewal_interval_hours")]
    pub renewal_interval_hours: i64,

    /// Transient failures tolerated per queue item before it is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long a claim stays exclusive before the item returns to the queue
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: i64,

    /// HTTP timeout for product data requests
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Seconds between renewal runs in the worker daemon
    #[serde(default = "default_worker_poll_secs")]
    pub worker_poll_secs: u64,

    /// Seconds the worker daemon waits after the source asked it to suspend
    #[serde(default = "default_suspend_backoff_secs")]
    pub suspend_backoff_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "apw:product_data_update".to_string()
}

fn default_renewal_interval_hours() -> i64 {
    24
}

fn default_max_attempts() -> u32 {
    3
}

fn default_claim_lease_secs() -> i64 {
    3600
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_worker_poll_secs() -> u64 {
    300
}

fn default_suspend_backoff_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Typed renewal policy derived from the raw settings.
    pub fn renewal_policy(&self) -> Result<RenewalPolicy, ConfigError> {
        if self.renewal_interval_hours <= 0 {
            return Err(ConfigError::Invalid("RENEWAL_INTERVAL_HOURS must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS must be at least 1"));
        }
        if self.claim_lease_secs <= 0 {
            return Err(ConfigError::Invalid("CLAIM_LEASE_SECS must be positive"));
        }

        let ttl = Duration::try_hours(self.renewal_interval_hours)
            .filter(|ttl| *ttl <= max_period())
            .ok_or(ConfigError::Invalid("RENEWAL_INTERVAL_HOURS is too large"))?;
        let claim_lease = Duration::try_seconds(self.claim_lease_secs)
            .filter(|lease| *lease <= max_period())
            .ok_or(ConfigError::Invalid("CLAIM_LEASE_SECS is too large"))?;

        Ok(RenewalPolicy {
            ttl,
            max_attempts: self.max_attempts,
            claim_lease,
        })
    }
}

/// Upper bound for configured periods, so `now - ttl` and `now + lease`
/// always stay in range.
fn max_period() -> Duration {
    Duration::days(100 * 365)
}

/// Staleness and retry parameters shared by the coordinator and queues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenewalPolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
    pub claim_lease: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(default_renewal_interval_hours()),
            max_attempts: default_max_attempts(),
            claim_lease: Duration::seconds(default_claim_lease_secs()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        vec![
            ("DATABASE_URL".into(), "postgres://localhost/apw".into()),
            ("REDIS_URL".into(), "redis://localhost".into()),
            ("PRODUCT_API_URL".into(), "http://localhost:8080".into()),
        ]
    }

    #[test]
    fn test_defaults_apply() {
        let config: AppConfig = envy::from_iter(required()).unwrap();
        assert_eq!(config.queue_name, "apw:product_data_update");
        assert_eq!(config.max_attempts, 3);
        assert!(config.product_api_token.is_none());

        let policy = config.renewal_policy().unwrap();
        assert_eq!(policy.ttl, Duration::hours(24));
        assert_eq!(policy.claim_lease, Duration::seconds(3600));
        assert_eq!(policy, RenewalPolicy::default());
    }

    #[test]
    fn test_overrides_from_env() {
        let mut vars = required();
        vars.push(("RENEWAL_INTERVAL_HOURS".into(), "6".into()));
        vars.push(("MAX_ATTEMPTS".into(), "5".into()));
        let config: AppConfig = envy::from_iter(vars).unwrap();

        let policy = config.renewal_policy().unwrap();
        assert_eq!(policy.ttl, Duration::hours(6));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut vars = required();
        vars.push(("MAX_ATTEMPTS".into(), "0".into()));
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert!(matches!(config.renewal_policy(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_huge_periods_rejected() {
        let mut vars = required();
        vars.push(("RENEWAL_INTERVAL_HOURS".into(), "9000000000000000".into()));
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert!(matches!(config.renewal_policy(), Err(ConfigError::Invalid(_))));

        let mut vars = required();
        vars.push(("RENEWAL_INTERVAL_HOURS".into(), "1000000".into()));
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert!(matches!(config.renewal_policy(), Err(ConfigError::Invalid(_))));

        let mut vars = required();
        vars.push(("CLAIM_LEASE_SECS".into(), i64::MAX.to_string()));
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert!(matches!(config.renewal_policy(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_database_url_fails() {
        let vars = vec![("REDIS_URL".to_string(), "redis://localhost".to_string())];
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
