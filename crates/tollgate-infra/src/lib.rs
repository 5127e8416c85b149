//! # Tollgate Infrastructure
//!
//! Concrete implementations of the ports defined in `tollgate-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external services, in-memory limiter only
//! - `auth` - JWT caller identity
//! - `redis` - Redis-backed distributed rate limiting

pub mod rate_limit;
pub mod retry;

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "redis")]
pub mod connection;

// Re-exports - In-Memory
pub use rate_limit::InMemoryRateLimiter;
pub use retry::{RetryPolicy, retry_with_backoff};

#[cfg(feature = "auth")]
pub use auth::{JwtConfig, JwtTokenService};

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use connection::{RedisConfig, RedisPool};
#[cfg(feature = "redis")]
pub use rate_limit::{RedisRateLimitConfig, RedisRateLimiter};
