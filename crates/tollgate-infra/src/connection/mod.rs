//! Redis connection plumbing shared by the Redis-backed adapters.

mod config;
mod pool;

pub use config::RedisConfig;
pub use pool::{PooledConnection, RedisPool};
