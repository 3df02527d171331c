use std::fmt;

use crate::error::StoreError;

/// A read command the fetcher stages on a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exists { key: String },
    MGet { keys: Vec<String> },
    HMGet { key: String, fields: Vec<String> },
    HGetAll { key: String },
    LRange { key: String, start: i64, end: i64 },
    SMembers { key: String },
    ZRange { key: String, start: i64, end: i64 },
}

impl Command {
    /// The wire name of the command.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "EXISTS",
            Self::MGet { .. } => "MGET",
            Self::HMGet { .. } => "HMGET",
            Self::HGetAll { .. } => "HGETALL",
            Self::LRange { .. } => "LRANGE",
            Self::SMembers { .. } => "SMEMBERS",
            Self::ZRange { .. } => "ZRANGE",
        }
    }

    /// Arguments in wire order, excluding the command name.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Exists { key } | Self::HGetAll { key } | Self::SMembers { key } => {
                vec![key.clone()]
            }
            Self::MGet { keys } => keys.clone(),
            Self::HMGet { key, fields } => std::iter::once(key.clone())
                .chain(fields.iter().cloned())
                .collect(),
            Self::LRange { key, start, end } | Self::ZRange { key, start, end } => {
                vec![key.clone(), start.to_string(), end.to_string()]
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        for arg in self.args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A single reply, normalised across protocol versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Bulk(String),
    Array(Vec<Reply>),
    /// An error reply for this command only (e.g. `WRONGTYPE`).
    Error(String),
}

impl Reply {
    /// Interpret the reply as an optional string payload.
    ///
    /// # Errors
    ///
    /// Error and array replies are protocol errors.
    pub fn into_payload(self) -> Result<Option<String>, StoreError> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(s) => Ok(Some(s)),
            Self::Integer(n) => Ok(Some(n.to_string())),
            Self::Error(message) => Err(StoreError::protocol(message)),
            Self::Array(_) => Err(StoreError::protocol(
                "expected a bulk string reply, found an array",
            )),
        }
    }

    /// Interpret the reply as an array. `Nil` is treated as empty.
    ///
    /// # Errors
    ///
    /// Error and scalar replies are protocol errors.
    pub fn into_array(self) -> Result<Vec<Reply>, StoreError> {
        match self {
            Self::Array(items) => Ok(items),
            Self::Nil => Ok(Vec::new()),
            Self::Error(message) => Err(StoreError::protocol(message)),
            other => Err(StoreError::protocol(format!(
                "expected an array reply, found {other:?}"
            ))),
        }
    }
}
