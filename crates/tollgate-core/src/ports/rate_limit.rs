//! Rate limiting port.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{BucketKey, BucketParams, BucketState};

/// Rate limiter trait - abstraction over token-bucket backends.
///
/// Implementations must run each acquisition as one atomic unit per key:
/// no other caller may observe or change the bucket between the read and
/// the write.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take one token from the bucket named by `key`.
    /// Returns Ok(true) if admitted, Ok(false) if rate limited.
    /// The bucket is written back in both cases.
    async fn try_acquire(
        &self,
        key: &BucketKey,
        params: &BucketParams,
    ) -> Result<bool, RateLimitError>;

    /// Read the stored bucket without changing it.
    async fn bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, RateLimitError>;
}

/// Rate limit errors.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The store did not answer in time. Kept apart from other failures so
    /// the admission layer can apply its failure policy to it explicitly.
    #[error("Rate limit store timed out after {after:?}")]
    Timeout { after: Duration },

    /// The store could not be reached. The command was never sent.
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),

    /// The connection failed while a command was outstanding. The command
    /// may or may not have run.
    #[error("Rate limit store connection lost: {0}")]
    Disconnected(String),

    /// The limiter has been shut down.
    #[error("Rate limit store closed")]
    Closed,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl RateLimitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RateLimitError::Timeout { .. })
    }

    /// Whether running the command again is safe and may succeed.
    ///
    /// Acquisition is not idempotent, so only failures that happened before
    /// the command reached the store qualify. A timeout does not: the store
    /// may already have spent the token.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RateLimitError::Unavailable(_))
    }
}
