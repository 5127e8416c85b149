//! Bounded pool of auto-reconnecting Redis connections.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use tollgate_core::ports::RateLimitError;

use super::RedisConfig;

/// Reconnect attempts a connection makes on its own before surfacing errors.
const RECONNECT_RETRIES: usize = 2;

/// Pool of multiplexed Redis connections.
///
/// Each `ConnectionManager` pipelines many concurrent commands over one
/// socket and reconnects in the background when the socket drops. The pool
/// spreads callers across `pool_size` of them round-robin, and a semaphore
/// caps how many commands may be outstanding at once.
pub struct RedisPool {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    in_flight: Arc<Semaphore>,
}

/// A checked-out connection. Holds an in-flight slot until dropped.
pub struct PooledConnection {
    conn: ConnectionManager,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

fn manager_config(config: &RedisConfig) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_connection_timeout(config.connect_timeout)
        .set_number_of_retries(RECONNECT_RETRIES)
}

impl RedisPool {
    /// Open every connection up front. Fails if any of them cannot be
    /// established within `connect_timeout`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, RateLimitError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;
        let pool_size = config.pool_size.max(1);

        // Use timeout to prevent hanging if Redis is unreachable
        let connect_all = try_join_all((0..pool_size).map(|_| {
            ConnectionManager::new_with_config(client.clone(), manager_config(config))
        }));
        let connections = tokio::time::timeout(config.connect_timeout, connect_all)
            .await
            .map_err(|_| RateLimitError::Timeout {
                after: config.connect_timeout,
            })?
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;

        tracing::info!(
            url = %config.url,
            pool_size,
            max_in_flight = config.max_in_flight,
            "Connected to Redis"
        );

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        })
    }

    /// Check out a connection, waiting for an in-flight slot if the pool is
    /// saturated. Callers bound the wait with their own deadline.
    pub async fn get(&self) -> Result<PooledConnection, RateLimitError> {
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed)?;

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();

        Ok(PooledConnection {
            conn: self.connections[index].clone(),
            _permit: permit,
        })
    }

    /// Number of underlying connections.
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// In-flight slots currently free.
    pub fn available(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Refuse new checkouts. Commands already in flight complete normally.
    pub fn close(&self) {
        self.in_flight.close();
        tracing::info!("Redis pool closed");
    }
}
