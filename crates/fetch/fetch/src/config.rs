use std::time::Duration;

use serde::Deserialize;

/// Configuration for a [`BatchFetcher`](crate::BatchFetcher).
///
/// Deserializable from the `[fetch]` table of a TOML file:
///
/// ```
/// use pipefetch::FetchConfig;
///
/// let config = FetchConfig::from_toml_str("flush_timeout_ms = 250").unwrap();
/// assert_eq!(config.flush_timeout(), Some(std::time::Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-call deadline in milliseconds, covering every pipeline flush of a
    /// fetch together. Unbounded when unset. A request's own timeout takes
    /// precedence.
    pub flush_timeout_ms: Option<u64>,
}

impl FetchConfig {
    pub fn flush_timeout(&self) -> Option<Duration> {
        self.flush_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}
