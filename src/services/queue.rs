use async_trait::async_trait;
use chrono::{Duration, Utc};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::product::ProductKey;
use crate::models::queue::{ClaimedItem, QueueDepth, QueueItem};

/// Claim/release work queue of renewal requests.
///
/// Every claimed item must end in `delete`, `release` or `abandon`. A claim
/// that is never settled expires after the queue's lease and the item goes
/// back to the tail of the queue.
#[async_trait]
pub trait RenewalQueue: Send + Sync {
    /// Append an item at the tail.
    async fn push(&self, item: QueueItem) -> Result<QueueItem, QueueError>;

    async fn enqueue(&self, key: &ProductKey) -> Result<QueueItem, QueueError> {
        self.push(QueueItem::new(key.clone(), Utc::now())).await
    }

    /// Enqueue a renewal that is carried out even if the product is fresh.
    async fn enqueue_forced(&self, key: &ProductKey) -> Result<QueueItem, QueueError> {
        self.push(QueueItem::new(key.clone(), Utc::now()).forced()).await
    }

    /// Non-blocking; `None` when nothing is available.
    async fn claim(&self) -> Result<Option<ClaimedItem>, QueueError>;

    /// Remove a processed item for good.
    async fn delete(&self, claim: &ClaimedItem) -> Result<(), QueueError>;

    /// Put the item back at the tail with `attempts + 1`.
    async fn release(&self, claim: &ClaimedItem) -> Result<(), QueueError>;

    /// Give up on the item without returning it to the queue.
    async fn abandon(&self, claim: &ClaimedItem) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue item {item_id} is not claimed by this caller")]
    NotClaimed { item_id: Uuid },
}

// KEYS: pending, claims, deadlines. ARGV: now_ms, receipt, deadline_ms.
// Expired claims go back to the tail before the head is popped.
const CLAIM_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
  local payload = redis.call('HGET', KEYS[2], receipt)
  if payload then
    redis.call('LPUSH', KEYS[1], payload)
  end
  redis.call('HDEL', KEYS[2], receipt)
  redis.call('ZREM', KEYS[3], receipt)
end
local payload = redis.call('RPOP', KEYS[1])
if not payload then
  return false
end
redis.call('HSET', KEYS[2], ARGV[2], payload)
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
return payload
";

// KEYS: pending, claims, deadlines. ARGV: receipt, payload to requeue.
const RELEASE_SCRIPT: &str = r"
if redis.call('HDEL', KEYS[2], ARGV[1]) == 0 then
  return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('LPUSH', KEYS[1], ARGV[2])
return 1
";

// KEYS: claims, deadlines. ARGV: receipt.
const SETTLE_SCRIPT: &str = r"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
";

/// Redis-backed renewal queue.
///
/// Pending items live in a list (LPUSH at the tail, RPOP at the head).
/// Claims live in a hash keyed by receipt plus a sorted set of lease
/// deadlines; the Lua scripts keep each transition atomic.
pub struct RedisRenewalQueue {
    client: redis::Client,
    pending_key: String,
    claims_key: String,
    deadlines_key: String,
    lease: Duration,
    claim_script: redis::Script,
    release_script: redis::Script,
    settle_script: redis::Script,
}

impl RedisRenewalQueue {
    pub fn new(redis_url: &str, queue_name: &str, lease: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            pending_key: format!("{queue_name}:pending"),
            claims_key: format!("{queue_name}:claims"),
            deadlines_key: format!("{queue_name}:deadlines"),
            lease,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            settle_script: redis::Script::new(SETTLE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn settle(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let settled: i64 = self
            .settle_script
            .key(&self.claims_key)
            .key(&self.deadlines_key)
            .arg(claim.receipt.to_string())
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            return Err(QueueError::NotClaimed { item_id: claim.item.id });
        }
        Ok(())
    }
}

#[async_trait]
impl RenewalQueue for RedisRenewalQueue {
    async fn push(&self, item: QueueItem) -> Result<QueueItem, QueueError> {
        let payload = serde_json::to_string(&item)?;

        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.pending_key, &payload).await?;

        tracing::debug!(
            product_key = %item.key,
            item_id = %item.id,
            forced = item.forced,
            "Enqueued renewal"
        );
        Ok(item)
    }

    async fn claim(&self) -> Result<Option<ClaimedItem>, QueueError> {
        let now = Utc::now();
        let receipt = Uuid::new_v4();
        let lease_expires_at = now + self.lease;

        let mut conn = self.connection().await?;
        let payload: Option<String> = self
            .claim_script
            .key(&self.pending_key)
            .key(&self.claims_key)
            .key(&self.deadlines_key)
            .arg(now.timestamp_millis())
            .arg(receipt.to_string())
            .arg(lease_expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match payload {
            Some(payload) => {
                let item: QueueItem = serde_json::from_str(&payload)?;
                Ok(Some(ClaimedItem {
                    item,
                    receipt,
                    lease_expires_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        self.settle(claim).await
    }

    async fn release(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&claim.item.retried())?;

        let mut conn = self.connection().await?;
        let released: i64 = self
            .release_script
            .key(&self.pending_key)
            .key(&self.claims_key)
            .key(&self.deadlines_key)
            .arg(claim.receipt.to_string())
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            return Err(QueueError::NotClaimed { item_id: claim.item.id });
        }
        Ok(())
    }

    async fn abandon(&self, claim: &ClaimedItem) -> Result<(), QueueError> {
        self.settle(claim).await
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let mut conn = self.connection().await?;
        let pending: u64 = conn.llen(&self.pending_key).await?;
        let claimed: u64 = conn.hlen(&self.claims_key).await?;
        Ok(QueueDepth { pending, claimed })
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
