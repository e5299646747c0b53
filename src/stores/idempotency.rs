//! Idempotency cache over Redis.
//!
//! Deduplicates retried mutating calls. A protected operation claims its
//! key atomically (SET NX), executes, then commits the serialized result
//! under a 24h TTL. Retries within the TTL replay the committed result
//! byte-for-byte; concurrent duplicates wait briefly for the winner's
//! commit. A failed execution releases the claim so later retries run
//! fresh, and the claim's own short TTL covers a worker that died between
//! claim and commit.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Result TTL: 24 hours.
pub const RESULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Claim TTL: long enough for any single protected operation.
const CLAIM_TTL_SECS: u64 = 60;

/// Sentinel stored while the first caller is still executing.
const PENDING: &str = "__pending__";

/// How long a concurrent duplicate waits for the winner to commit before
/// giving up with `Busy`.
const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    /// This caller holds the claim and must execute the operation, then
    /// `commit` or `release`.
    Proceed,
    /// The operation already ran; here is its committed result.
    Replay(String),
    /// Another caller holds the claim and did not commit within the poll
    /// window. Maps to Conflict at the HTTP layer.
    Busy,
}

/// Cache key for a protected operation: the raw (user, operation, token)
/// triple never reaches Redis.
pub fn cache_key(user_id: i64, operation: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", user_id, operation, token));
    format!("idem:{}", hex::encode(hasher.finalize()))
}

#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn begin(&self, key: &str) -> Result<Begin, AppError>;

    async fn commit(&self, key: &str, result: &str, ttl_secs: u64) -> Result<(), AppError>;

    async fn release(&self, key: &str) -> Result<(), AppError>;
}

/// Runs `run` under the protection of `key`: a retry within the result TTL
/// replays the committed JSON byte-for-byte instead of executing again, and
/// a failed run releases the claim so the next retry starts fresh.
pub async fn run_protected<C, F, Fut>(
    cache: &C,
    key: &str,
    run: F,
) -> Result<serde_json::Value, AppError>
where
    C: IdempotencyCache,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, AppError>>,
{
    match cache.begin(key).await? {
        Begin::Replay(cached) => {
            serde_json::from_str(&cached).map_err(|e| AppError::InternalServerError(e.to_string()))
        }
        Begin::Busy => Err(AppError::Conflict(
            "Operation already in progress".to_string(),
        )),
        Begin::Proceed => match run().await {
            Ok(value) => {
                if let Err(e) = cache.commit(key, &value.to_string(), RESULT_TTL_SECS).await {
                    tracing::warn!("Failed to commit idempotency result: {}", e);
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = cache.release(key).await {
                    tracing::warn!("Failed to release idempotency claim: {}", e);
                }
                Err(err)
            }
        },
    }
}

/// Redis implementation.
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    client: redis::Client,
}

impl RedisIdempotencyCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn begin(&self, key: &str) -> Result<Begin, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Atomic claim: exactly one concurrent caller gets the nil reply.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(PENDING)
            .arg("NX")
            .arg("EX")
            .arg(CLAIM_TTL_SECS)
            .query_async(&mut conn)
            .await?;

        if claimed.is_some() {
            return Ok(Begin::Proceed);
        }

        // Key exists: either a committed result or an in-flight claim.
        for _ in 0..POLL_ATTEMPTS {
            match self.get(key).await? {
                Some(value) if value != PENDING => return Ok(Begin::Replay(value)),
                Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
                // Claim expired or was released; let the caller retry fresh.
                None => return Ok(Begin::Busy),
            }
        }

        Ok(Begin::Busy)
    }

    async fn commit(&self, key: &str, result: &str, ttl_secs: u64) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(result)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
