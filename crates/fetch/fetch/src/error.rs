use std::fmt;

use thiserror::Error;

use crate::decode::TargetType;

/// Boxed error returned by pluggable collaborators (fallback suppliers,
/// structured decoders).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of failures surfaced by a pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The connection could not be acquired, was refused, or dropped mid-flight.
    Connection,
    /// A flush did not complete within the configured deadline.
    Timeout,
    /// The store replied with an error or with an unexpected reply shape.
    Protocol,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Timeout => f.write_str("timeout"),
            Self::Protocol => f.write_str("protocol"),
        }
    }
}

/// A failure reported by the store or the session talking to it.
///
/// `StoreError` is `Clone` so that a single failed flush can resolve every
/// outstanding response handle with the same cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Protocol, message)
    }
}

/// Errors from a batch fetch. Every variant aborts the whole call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// `source` carries the structured decoder's reason, when it gave one.
    #[error("cannot decode {payload:?} at key {key:?} as {target}")]
    Decode {
        key: String,
        payload: String,
        target: TargetType,
        #[source]
        source: Option<BoxError>,
    },

    #[error("fallback for key {key:?} failed: {source}")]
    Fallback {
        key: String,
        #[source]
        source: BoxError,
    },
}

impl FetchError {
    /// The store error kind, if this error came from the session.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store(e) => Some(e.kind),
            _ => None,
        }
    }
}
