//! Pipelined multi-key reads with typed decoding and empty-key fallback.
//!
//! A [`BatchFetcher`] reads a batch of keys of one data-structure kind
//! (string, hash, list, set, sorted set) in a single pipelined round-trip,
//! decodes the payloads into a requested [`TargetType`], and substitutes a
//! caller-supplied default for keys the store does not hold.
//!
//! # Flow
//!
//! 1. A [`PipelineSession`] is opened on a connection from a
//!    [`ConnectionProvider`].
//! 2. When the request carries a fallback, the [`ExistenceGate`] probes every
//!    key with `EXISTS` and fills absent keys from the fallback.
//! 3. A kind-specific [`FetchStrategy`] stages the reads for the remaining
//!    keys, the session is flushed once, and replies are decoded by the
//!    [`ValueDecoder`].
//!
//! Backends live in separate crates (`pipefetch-memory`, `pipefetch-redis`)
//! and are checked with the suite in [`testing`].

pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod provider;
pub mod request;
pub mod session;
pub mod strategy;
pub mod testing;
pub mod value;

pub use command::{Command, Reply};
pub use config::FetchConfig;
pub use decode::{JsonDecoder, Scalar, SchemaDecoder, StructuredDecoder, TargetType, ValueDecoder};
pub use error::{BoxError, FetchError, StoreError, StoreErrorKind};
pub use fetcher::BatchFetcher;
pub use gate::{ExistenceGate, GateOutcome};
pub use provider::{ConnectionProvider, Disposition, PipelineConnection};
pub use request::{DataKind, Fallback, FetchRequest, KindSpec};
pub use session::{Pipeline, PipelineSession, ResponseHandle};
pub use strategy::FetchStrategy;
pub use value::{FetchResult, Fetched, FieldMap};
