//! Redis backend for `pipefetch`.
//!
//! [`RedisConnectionProvider`] hands out connections from a `deadpool-redis`
//! pool. Each [`RedisConnection`] sends a staged batch as a single
//! `redis::pipe()` and normalises RESP2 and RESP3 replies into
//! [`pipefetch::Reply`]. Connections released with
//! [`pipefetch::Disposition::Discard`] are detached from the pool and closed.
//!
//! # Example
//!
//! ```ignore
//! use pipefetch::{BatchFetcher, FetchRequest};
//! use pipefetch_redis::{RedisConfig, RedisConnectionProvider};
//!
//! let provider = RedisConnectionProvider::new(&RedisConfig::new("redis://localhost:6379"))?;
//! let fetcher = BatchFetcher::new(provider);
//! let result = fetcher.fetch(&FetchRequest::strings(["s:1", "s:2"])).await?;
//! ```

mod config;
mod connection;
mod provider;

pub use config::RedisConfig;
pub use connection::RedisConnection;
pub use provider::RedisConnectionProvider;
