//! Application state - shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use tollgate_core::domain::BucketParams;
use tollgate_core::ports::{RateLimiter, TokenService};
use tollgate_infra::{InMemoryRateLimiter, JwtTokenService, RedisRateLimiter};

use crate::config::{AppConfig, ConfigError, LimiterBackend};
use crate::middleware::rate_limit::{FailurePolicy, RateLimit};

/// How often the in-process limiter sweeps expired buckets.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub redis: Option<Arc<RedisRateLimiter>>,
    pub tokens: Arc<dyn TokenService>,
    pub failure_policy: FailurePolicy,
    pub default_policy: BucketParams,
    pub burst_policy: BucketParams,
    pub backend: LimiterBackend,
}

impl AppState {
    /// Build the application state, connecting to the configured store.
    ///
    /// Bucket parameters are checked before any connection is attempted.
    pub async fn new(config: &AppConfig) -> Result<Self, ConfigError> {
        let default_policy =
            BucketParams::new(config.rate_limit.rate, config.rate_limit.capacity)?;
        let burst_policy = BucketParams::new(0.5, Some(5))?;

        let (limiter, redis, backend): (
            Arc<dyn RateLimiter>,
            Option<Arc<RedisRateLimiter>>,
            LimiterBackend,
        ) = match config.rate_limit.backend {
            LimiterBackend::Redis => match RedisRateLimiter::new(config.redis.clone()).await {
                Ok(limiter) => {
                    let redis = Arc::new(limiter);
                    tracing::info!(
                        pool_size = redis.pool().size(),
                        "Using Redis rate limiting"
                    );
                    let limiter: Arc<dyn RateLimiter> = redis.clone();
                    (limiter, Some(redis), LimiterBackend::Redis)
                }
                Err(e) if config.redis.redis.fallback_to_memory => {
                    tracing::error!(
                        error = %e,
                        "Failed to connect to Redis. Falling back to in-memory rate limiting."
                    );
                    (memory_limiter(), None, LimiterBackend::Memory)
                }
                Err(e) => return Err(e.into()),
            },
            LimiterBackend::Memory => {
                tracing::warn!("Using in-memory rate limiting; limits are per process");
                (memory_limiter(), None, LimiterBackend::Memory)
            }
        };

        tracing::info!(
            backend = backend.as_str(),
            failure_policy = config.rate_limit.failure_policy.as_str(),
            rate = default_policy.rate(),
            capacity = default_policy.capacity(),
            "Application state initialized"
        );

        Ok(Self {
            limiter,
            redis,
            tokens: Arc::new(JwtTokenService::new(config.jwt.clone())),
            failure_policy: config.rate_limit.failure_policy,
            default_policy,
            burst_policy,
            backend,
        })
    }

    /// Middleware guarding a route with the given bucket parameters.
    pub fn rate_limit(&self, params: BucketParams) -> RateLimit {
        RateLimit::new(Arc::clone(&self.limiter), params, self.failure_policy)
    }

    /// Release the store connections.
    pub fn shutdown(&self) {
        if let Some(redis) = &self.redis {
            redis.pool().close();
        }
    }
}

fn memory_limiter() -> Arc<dyn RateLimiter> {
    let limiter = Arc::new(InMemoryRateLimiter::new());

    let sweeper = Arc::clone(&limiter);
    actix_rt::spawn(async move {
        let mut interval = actix_rt::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sweeper.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired buckets");
            }
        }
    });

    limiter
}
