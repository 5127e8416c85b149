//! Domain-level error types.

use thiserror::Error;

/// Domain errors - invalid limiter configuration.
///
/// These are programmer errors and surface when a policy is built,
/// never while a request is being admitted.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("Invalid rate {0}: must be a finite number greater than zero")]
    InvalidRate(f64),

    #[error("Invalid capacity: must be at least 1")]
    InvalidCapacity,
}
