//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;

use thiserror::Error;

use tollgate_core::DomainError;
use tollgate_core::ports::RateLimitError;
use tollgate_infra::{JwtConfig, RedisRateLimitConfig};

use crate::middleware::rate_limit::FailurePolicy;

/// Startup failures. Any of these aborts the process before it binds.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid rate limit policy: {0}")]
    Policy(#[from] DomainError),

    #[error("Rate limit store unavailable: {0}")]
    Store(#[from] RateLimitError),
}

/// Where token buckets live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterBackend {
    /// Shared across every server process.
    Redis,
    /// Local to this process.
    Memory,
}

impl LimiterBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterBackend::Redis => "redis",
            LimiterBackend::Memory => "memory",
        }
    }
}

impl FromStr for LimiterBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(LimiterBackend::Redis),
            "memory" => Ok(LimiterBackend::Memory),
            _ => Err(()),
        }
    }
}

/// Rate limiting settings shared by every guarded route.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub backend: LimiterBackend,
    pub failure_policy: FailurePolicy,
    /// Default refill rate, tokens per second.
    pub rate: f64,
    /// Default burst size; `ceil(rate)` when unset.
    pub capacity: Option<u32>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: RateLimitSettings,
    pub redis: RedisRateLimitConfig,
    pub jwt: JwtConfig,
}

/// Parse an optional variable, rejecting values that are set but malformed.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limit = RateLimitSettings {
            backend: parse_var("RATE_LIMIT_BACKEND")?.unwrap_or(LimiterBackend::Redis),
            failure_policy: parse_var("RATE_LIMIT_FAILURE_POLICY")?.unwrap_or_default(),
            rate: parse_var("RATE_LIMIT_RATE")?.unwrap_or(10.0),
            capacity: parse_var("RATE_LIMIT_CAPACITY")?,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT")?.unwrap_or(8080),
            rate_limit,
            redis: RedisRateLimitConfig::from_env(),
            jwt: JwtConfig::from_env(),
        })
    }
}
