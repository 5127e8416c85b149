//! In-memory token-bucket rate limiter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tollgate_core::domain::{BUCKET_TTL, BucketKey, BucketParams, BucketState, step};
use tollgate_core::ports::{RateLimitError, RateLimiter};
use tollgate_core::{Clock, SystemClock};

struct Entry {
    state: BucketState,
    expires_at_ms: u64,
}

/// In-memory rate limiter running the same token-bucket step as the Redis
/// script.
///
/// Buckets live in this process only. It suits local development and tests;
/// across several server processes each would enforce its own limit.
pub struct InMemoryRateLimiter<C: Clock = SystemClock> {
    buckets: Mutex<HashMap<String, Entry>>,
    clock: C,
    ttl: Duration,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryRateLimiter<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            clock,
            ttl: BUCKET_TTL,
        }
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Drop buckets whose TTL has lapsed. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now_millis();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, entry| entry.expires_at_ms > now_ms);
        before - buckets.len()
    }

    /// Number of buckets currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<C: Clock> RateLimiter for InMemoryRateLimiter<C> {
    async fn try_acquire(
        &self,
        key: &BucketKey,
        params: &BucketParams,
    ) -> Result<bool, RateLimitError> {
        // The lock spans read, compute and write, so each key sees a serial history.
        let mut buckets = self.buckets.lock().await;
        let now_ms = self.clock.now_millis();

        let previous = buckets
            .get(key.as_str())
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.state);

        let decision = step(previous.as_ref(), params, now_ms);

        buckets.insert(
            key.as_str().to_string(),
            Entry {
                state: decision.state,
                expires_at_ms: now_ms.saturating_add(self.ttl_ms()),
            },
        );

        Ok(decision.admitted)
    }

    async fn bucket(&self, key: &BucketKey) -> Result<Option<BucketState>, RateLimitError> {
        let now_ms = self.clock.now_millis();
        let buckets = self.buckets.lock().await;

        Ok(buckets
            .get(key.as_str())
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tollgate_core::domain::Caller;

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn limiter() -> (Arc<ManualClock>, InMemoryRateLimiter<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::default());
        (clock.clone(), InMemoryRateLimiter::with_clock(clock))
    }

    fn key(caller: &str) -> BucketKey {
        BucketKey::new("GET", "/api/test", &Caller::User(caller.to_string()))
    }

    #[tokio::test]
    async fn test_first_call_stores_capacity_minus_one() {
        let (_, limiter) = limiter();
        let params = BucketParams::new(10.0, Some(20)).unwrap();

        assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());

        let state = limiter.bucket(&key("1")).await.unwrap().unwrap();
        assert_eq!(state.quota, 19);
        assert_eq!(state.quota_remainder, 0.0);
    }

    #[tokio::test]
    async fn test_sixth_rapid_call_rejected() {
        let (_, limiter) = limiter();
        let params = BucketParams::new(5.0, Some(5)).unwrap();

        for _ in 0..5 {
            assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());
        }
        assert!(!limiter.try_acquire(&key("1"), &params).await.unwrap());
    }

    #[tokio::test]
    async fn test_callers_do_not_share_buckets() {
        let (_, limiter) = limiter();
        let params = BucketParams::new(1.0, Some(2)).unwrap();

        for _ in 0..2 {
            assert!(limiter.try_acquire(&key("user-A"), &params).await.unwrap());
        }
        assert!(!limiter.try_acquire(&key("user-A"), &params).await.unwrap());

        assert!(limiter.try_acquire(&key("user-B"), &params).await.unwrap());
    }

    #[tokio::test]
    async fn test_refill_after_idle() {
        let (clock, limiter) = limiter();
        let params = BucketParams::new(2.0, Some(4)).unwrap();

        for _ in 0..4 {
            assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());
        }
        assert!(!limiter.try_acquire(&key("1"), &params).await.unwrap());

        clock.advance(Duration::from_secs(2));

        for _ in 0..4 {
            assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());
        }
        assert!(!limiter.try_acquire(&key("1"), &params).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_bucket_starts_over() {
        let (clock, limiter) = limiter();
        let params = BucketParams::new(0.001, Some(3)).unwrap();

        for _ in 0..3 {
            assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());
        }

        clock.advance(BUCKET_TTL + Duration::from_millis(1));
        assert!(limiter.bucket(&key("1")).await.unwrap().is_none());

        assert!(limiter.try_acquire(&key("1"), &params).await.unwrap());
        let state = limiter.bucket(&key("1")).await.unwrap().unwrap();
        assert_eq!(state.quota, 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, limiter) = limiter();
        let params = BucketParams::per_second(1.0).unwrap();

        limiter.try_acquire(&key("old"), &params).await.unwrap();
        clock.advance(BUCKET_TTL);
        limiter.try_acquire(&key("fresh"), &params).await.unwrap();

        assert_eq!(limiter.purge_expired().await, 1);
        assert_eq!(limiter.len().await, 1);
        assert!(limiter.bucket(&key("fresh")).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_over_admit() {
        let (_, limiter) = limiter();
        let limiter = Arc::new(limiter);
        let params = BucketParams::new(1.0, Some(10)).unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.try_acquire(&key("1"), &params).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    }
}
