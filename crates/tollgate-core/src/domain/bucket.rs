use std::time::Duration;

use crate::error::DomainError;

/// Idle lifetime of a bucket. Every write refreshes it; once it lapses the
/// store reclaims the key and the next request starts from full capacity.
pub const BUCKET_TTL: Duration = Duration::from_secs(60 * 60);

/// Refill rate and burst size for one guarded operation.
///
/// Bound when a route is configured and passed on every acquisition;
/// nothing here is persisted with the bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    rate: f64,
    capacity: u32,
}

impl BucketParams {
    /// Build parameters, defaulting `capacity` to `ceil(rate)`.
    pub fn new(rate: f64, capacity: Option<u32>) -> Result<Self, DomainError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DomainError::InvalidRate(rate));
        }

        // `as` saturates, so absurd rates clamp to u32::MAX instead of wrapping.
        let capacity = capacity.unwrap_or_else(|| rate.ceil() as u32);
        if capacity == 0 {
            return Err(DomainError::InvalidCapacity);
        }

        Ok(Self { rate, capacity })
    }

    /// Parameters with the default capacity of `ceil(rate)`.
    pub fn per_second(rate: f64) -> Result<Self, DomainError> {
        Self::new(rate, None)
    }

    /// Tokens refilled per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Whole tokens available, in `[0, capacity]`.
    pub quota: u32,
    /// Fractional token accrued since the last whole one, in `[0, 1)`.
    pub quota_remainder: f64,
    /// Store time of the last update, in milliseconds.
    pub timestamp_ms: u64,
}

/// Outcome of one acquisition attempt: the verdict plus the state to persist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub admitted: bool,
    pub state: BucketState,
}

/// One atomic token-bucket step.
///
/// Refills `previous` for the time elapsed until `now_ms`, capped at
/// capacity, then consumes a token if at least one is available. Both
/// outcomes produce a state to write back so fractional accrual survives
/// rejected requests. Callers must run this read-compute-write sequence
/// atomically per key.
pub fn step(previous: Option<&BucketState>, params: &BucketParams, now_ms: u64) -> Decision {
    let Some(previous) = previous else {
        return Decision {
            admitted: true,
            state: BucketState {
                quota: params.capacity - 1,
                quota_remainder: 0.0,
                timestamp_ms: now_ms,
            },
        };
    };

    // A clock that moved backwards refills nothing.
    let elapsed_ms = now_ms.saturating_sub(previous.timestamp_ms) as f64;
    let refreshed = (f64::from(previous.quota)
        + previous.quota_remainder
        + params.rate * elapsed_ms / 1000.0)
        .min(f64::from(params.capacity));

    if refreshed >= 1.0 {
        let left = refreshed - 1.0;
        let whole = left.floor();
        Decision {
            admitted: true,
            state: BucketState {
                quota: whole as u32,
                quota_remainder: left - whole,
                timestamp_ms: now_ms,
            },
        }
    } else {
        Decision {
            admitted: false,
            state: BucketState {
                quota: 0,
                quota_remainder: refreshed,
                timestamp_ms: now_ms,
            },
        }
    }
}
