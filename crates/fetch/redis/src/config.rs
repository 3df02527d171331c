use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Configuration for the Redis connection provider.
///
/// Deserializes from a table such as:
///
/// ```toml
/// url = "redis://cache.internal:6379"
/// pool_size = 32
/// connection_timeout_ms = 250
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    pub url: String,

    /// Number of connections in the `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    #[serde(rename = "connection_timeout_ms", deserialize_with = "millis")]
    pub connection_timeout: Duration,
}

impl RedisConfig {
    /// Default settings pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
