//! Redis rate limiter implementation using a server-side token-bucket script.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{RedisError, Script};

use tollgate_core::domain::{BUCKET_TTL, BucketKey, BucketParams, BucketState};
use tollgate_core::ports::{RateLimitError, RateLimiter};

use crate::connection::{RedisConfig, RedisPool};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Token bucket, evaluated atomically inside Redis.
///
/// KEYS[1] bucket key
/// ARGV[1] refill rate (tokens per second)
/// ARGV[2] capacity
/// ARGV[3] ttl in milliseconds
///
/// Returns: [admitted (0|1), quota, quota_remainder as string]
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local ttl_ms = tonumber(ARGV[3])

-- Writes after TIME need effect replication on Redis < 5.
if redis.replicate_commands then
    redis.replicate_commands()
end

local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local stored = redis.call('HMGET', key, 'quota', 'quota_remainder', 'timestamp_ms')
if not stored[1] then
    redis.call('HSET', key, 'quota', capacity - 1, 'quota_remainder', 0, 'timestamp_ms', now_ms)
    redis.call('PEXPIRE', key, ttl_ms)
    return {1, capacity - 1, '0'}
end

local elapsed_ms = now_ms - tonumber(stored[3])
if elapsed_ms < 0 then
    elapsed_ms = 0
end

local quota = math.min(
    capacity,
    tonumber(stored[1]) + tonumber(stored[2]) + rate * elapsed_ms / 1000
)

if quota >= 1 then
    quota = quota - 1
    local whole = math.floor(quota)
    local remainder = quota - whole
    redis.call('HSET', key, 'quota', whole, 'quota_remainder', remainder, 'timestamp_ms', now_ms)
    redis.call('PEXPIRE', key, ttl_ms)
    return {1, whole, string.format('%.17g', remainder)}
end

redis.call('HSET', key, 'quota', 0, 'quota_remainder', quota, 'timestamp_ms', now_ms)
redis.call('PEXPIRE', key, ttl_ms)
return {0, 0, string.format('%.17g', quota)}
"#;

/// Redis rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RedisRateLimitConfig {
    /// Redis connection config
    pub redis: RedisConfig,
    /// Retries for connection-level failures
    pub retry: RetryPolicy,
    /// Idle lifetime of a bucket
    pub bucket_ttl: Duration,
}

impl Default for RedisRateLimitConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            retry: RetryPolicy::default(),
            bucket_ttl: BUCKET_TTL,
        }
    }
}

impl RedisRateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            retry: RetryPolicy::from_env(),
            bucket_ttl: BUCKET_TTL,
        }
    }
}

/// Redis-backed token-bucket rate limiter.
///
/// All bucket arithmetic happens inside one Lua script, which Redis runs
/// without interleaving other commands, so concurrent callers on any number
/// of hosts see a linearizable history per key. Time comes from the Redis
/// `TIME` command, never from the calling host.
pub struct RedisRateLimiter {
    pool: RedisPool,
    config: RedisRateLimitConfig,
    script: Script,
}

fn classify(error: RedisError, after: Duration) -> RateLimitError {
    if error.is_timeout() {
        RateLimitError::Timeout { after }
    } else if error.is_connection_refusal() {
        RateLimitError::Unavailable(error.to_string())
    } else if error.is_io_error() || error.is_connection_dropped() {
        RateLimitError::Disconnected(error.to_string())
    } else {
        RateLimitError::Backend(error.to_string())
    }
}

/// Decode the script reply into `(admitted, quota, quota_remainder)`.
fn parse_reply(
    (admitted, quota, remainder): (i64, i64, String),
) -> Result<(bool, u32, f64), RateLimitError> {
    let quota = u32::try_from(quota)
        .map_err(|_| RateLimitError::Backend(format!("Quota out of range: {quota}")))?;
    let quota_remainder = remainder
        .parse::<f64>()
        .map_err(|_| RateLimitError::Backend(format!("Malformed remainder: {remainder}")))?;

    Ok((admitted == 1, quota, quota_remainder))
}

/// Run an acquisition, retrying only failures where the script never reached
/// Redis. Anything else goes straight back to the caller, timeouts included.
async fn acquire_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    attempt: F,
) -> Result<T, RateLimitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RateLimitError>>,
{
    retry_with_backoff(policy, RateLimitError::is_retryable, attempt).await
}

impl RedisRateLimiter {
    pub async fn new(config: RedisRateLimitConfig) -> Result<Self, RateLimitError> {
        let pool = RedisPool::connect(&config.redis).await?;
        Ok(Self::with_pool(pool, config))
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, RateLimitError> {
        Self::new(RedisRateLimitConfig::from_env()).await
    }

    pub fn with_pool(pool: RedisPool, config: RedisRateLimitConfig) -> Self {
        Self {
            pool,
            config,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Bound one store round-trip, pool checkout included, by the response timeout.
    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, RateLimitError>>,
    ) -> Result<T, RateLimitError> {
        let after = self.config.redis.response_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| RateLimitError::Timeout { after })?
    }

    async fn invoke(
        &self,
        key: &BucketKey,
        params: &BucketParams,
    ) -> Result<(bool, u32, f64), RateLimitError> {
        let ttl_ms = u64::try_from(self.config.bucket_ttl.as_millis()).unwrap_or(u64::MAX);

        let reply: (i64, i64, String) = self
            .timed(async {
                let mut conn = self.pool.get().await?;
                self.script
                    .key(key.as_str())
                    .arg(params.rate())
                    .arg(params.capacity())
                    .arg(ttl_ms)
                    .invoke_async(&mut *conn)
                    .await
                    .map_err(|e| classify(e, self.config.redis.response_timeout))
            })
            .await?;

        parse_reply(reply)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire(
        &self,
        key: &BucketKey,
        params: &BucketParams,
    ) -> Result<bool, RateLimitError> {
        let (admitted, quota, quota_remainder) =
            acquire_with_retry(&self.config.retry, || self.invoke(key, params))
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        key = %key,
                        rate = params.rate(),
                        capacity = params.capacity(),
                        error = %e,
                        "Rate limit store call failed"
                    );
                })?;

        tracing::debug!(
            key = %key,
            admitted,
            quota,
            quota_remainder,
            "Token bucket evaluated"
        );

        Ok(admitted)
    }

    async fn bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, RateLimitError> {
        let (quota, quota_remainder, timestamp_ms): (Option<u32>, Option<f64>, Option<u64>) = self
            .timed(async {
                let mut conn = self.pool.get().await?;
                redis::cmd("HMGET")
                    .arg(key.as_str())
                    .arg("quota")
                    .arg("quota_remainder")
                    .arg("timestamp_ms")
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| classify(e, self.config.redis.response_timeout))
            })
            .await?;

        Ok(match (quota, quota_remainder, timestamp_ms) {
            (Some(quota), Some(quota_remainder), Some(timestamp_ms)) => Some(BucketState {
                quota,
                quota_remainder,
                timestamp_ms,
            }),
            _ => None,
        })
    }
}
