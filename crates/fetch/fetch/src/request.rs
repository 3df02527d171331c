use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::decode::TargetType;
use crate::error::{BoxError, FetchError};
use crate::value::Fetched;

/// The data-structure kind every key in a request holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("STRING"),
            Self::Hash => f.write_str("HASH"),
            Self::List => f.write_str("LIST"),
            Self::Set => f.write_str("SET"),
            Self::ZSet => f.write_str("ZSET"),
        }
    }
}

/// Kind tag plus the parameters that kind takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindSpec {
    String,
    /// An empty field list reads whole hashes.
    Hash {
        fields: Vec<String>,
    },
    /// Inclusive `LRANGE` indices; negative values count from the tail.
    List {
        start: i64,
        end: i64,
    },
    Set,
    /// Inclusive `ZRANGE` ranks in ascending score order.
    ZSet {
        start: i64,
        end: i64,
    },
}

impl KindSpec {
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::String => DataKind::String,
            Self::Hash { .. } => DataKind::Hash,
            Self::List { .. } => DataKind::List,
            Self::Set => DataKind::Set,
            Self::ZSet { .. } => DataKind::ZSet,
        }
    }
}

/// Supplies a value for a key the store reports as absent. Returning
/// `Ok(None)` leaves the key out of the result.
pub type Fallback = Arc<dyn Fn(&str) -> Result<Option<Fetched>, BoxError> + Send + Sync>;

/// A batch read of keys that all hold the same kind.
#[derive(Clone)]
pub struct FetchRequest {
    pub keys: Vec<String>,
    pub spec: KindSpec,
    pub target: TargetType,
    pub fallback: Option<Fallback>,
    /// Deadline budget for the whole call, shared by the existence check and
    /// the value read. Overrides the fetcher's configured timeout.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("keys", &self.keys)
            .field("spec", &self.spec)
            .field("target", &self.target)
            .field("fallback", &self.fallback.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FetchRequest {
    /// A request with string targets and no fallback.
    pub fn new<I, S>(keys: I, spec: KindSpec) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            spec,
            target: TargetType::String,
            fallback: None,
            timeout: None,
        }
    }

    pub fn strings<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, KindSpec::String)
    }

    pub fn hashes<I, S, F, T>(keys: I, fields: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let fields = fields.into_iter().map(Into::into).collect();
        Self::new(keys, KindSpec::Hash { fields })
    }

    pub fn lists<I, S>(keys: I, start: i64, end: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, KindSpec::List { start, end })
    }

    pub fn sets<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, KindSpec::Set)
    }

    pub fn sorted_sets<I, S>(keys: I, start: i64, end: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys, KindSpec::ZSet { start, end })
    }

    #[must_use]
    pub fn with_target(mut self, target: TargetType) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str) -> Result<Option<Fetched>, BoxError> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Bound the whole call: the existence check and the value read must
    /// both complete within `timeout` of the connection being acquired.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kind(&self) -> DataKind {
        self.spec.kind()
    }

    /// Check the request before any I/O.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Validation`] when a HASH request names a
    /// non-string target or repeats a field.
    pub fn validate(&self) -> Result<(), FetchError> {
        if let KindSpec::Hash { fields } = &self.spec {
            if self.target != TargetType::String {
                return Err(FetchError::Validation(format!(
                    "HASH values are returned as raw strings; target must be string, not {}",
                    self.target
                )));
            }
            let mut seen = HashSet::with_capacity(fields.len());
            if let Some(dup) = fields.iter().find(|f| !seen.insert(f.as_str())) {
                return Err(FetchError::Validation(format!(
                    "HASH field {dup:?} is requested more than once"
                )));
            }
        }
        Ok(())
    }
}
