use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::{debug, instrument};

use pipefetch::{ConnectionProvider, Disposition, StoreError};

use crate::config::RedisConfig;
use crate::connection::RedisConnection;

/// Hands out pipeline connections from a `deadpool-redis` pool.
///
/// Connections released for reuse go back to the pool. Discarded ones are
/// detached from the pool and dropped, which closes the socket and lets the
/// pool open a fresh connection on demand.
pub struct RedisConnectionProvider {
    pool: Pool,
}

impl RedisConnectionProvider {
    /// Create a provider from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns a connection [`StoreError`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StoreError::connection(e.to_string()))?
            .map_err(|e| StoreError::connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl std::fmt::Debug for RedisConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnectionProvider")
            .field("status", &self.pool.status())
            .finish()
    }
}

#[async_trait]
impl ConnectionProvider for RedisConnectionProvider {
    type Connection = RedisConnection;

    #[instrument(skip_all, level = "trace")]
    async fn acquire(&self) -> Result<RedisConnection, StoreError> {
        let inner = self.pool.get().await.map_err(|e| match e {
            deadpool_redis::PoolError::Timeout(_) => StoreError::timeout(e.to_string()),
            deadpool_redis::PoolError::Backend(ref inner) => {
                crate::connection::classify(inner)
            }
            _ => StoreError::connection(e.to_string()),
        })?;
        Ok(RedisConnection { inner })
    }

    fn release(&self, connection: RedisConnection, disposition: Disposition) {
        match disposition {
            Disposition::Reuse => drop(connection),
            Disposition::Discard => {
                debug!("detaching discarded redis connection from pool");
                drop(deadpool_redis::Connection::take(connection.inner));
            }
        }
    }
}
