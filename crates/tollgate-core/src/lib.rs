//! # Tollgate Core
//!
//! The domain layer of the Tollgate rate limiter.
//! This crate holds the token-bucket algorithm, bucket keys, and the ports
//! that storage adapters implement. It has zero infrastructure dependencies.

pub mod clock;
pub mod domain;
pub mod error;
pub mod ports;

pub use clock::{Clock, SystemClock};
pub use error::DomainError;
