//! Typed decoding of raw string payloads.
//!
//! A [`TargetType`] tag names the output type a payload must decode into.
//! Scalar tags are parsed from their canonical textual form; the
//! [`TargetType::Structured`] tag delegates to an injected
//! [`StructuredDecoder`], which by default parses JSON.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{BoxError, FetchError};

/// Closed set of element types a payload can decode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    String,
    Structured,
}

impl TargetType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded element.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Structured(serde_json::Value),
}

impl Scalar {
    /// The tag this value was decoded as.
    pub const fn target_type(&self) -> TargetType {
        match self {
            Self::I8(_) => TargetType::I8,
            Self::I16(_) => TargetType::I16,
            Self::I32(_) => TargetType::I32,
            Self::I64(_) => TargetType::I64,
            Self::F32(_) => TargetType::F32,
            Self::F64(_) => TargetType::F64,
            Self::Bool(_) => TargetType::Bool,
            Self::String(_) => TargetType::String,
            Self::Structured(_) => TargetType::Structured,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer variant, widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(n) => Some(i64::from(n)),
            Self::I16(n) => Some(i64::from(n)),
            Self::I32(n) => Some(i64::from(n)),
            Self::I64(n) => Some(n),
            _ => None,
        }
    }

    /// Any float variant, widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(n) => Some(f64::from(n)),
            Self::F64(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Deserialize a structured element into a concrete type.
    ///
    /// # Errors
    ///
    /// Fails if the element is not structured or does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, BoxError> {
        let value = self
            .as_structured()
            .ok_or_else(|| format!("expected a structured value, found {}", self.target_type()))?;
        Ok(T::deserialize(value)?)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Self::I32(n)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Self::I64(n)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::F64(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<serde_json::Value> for Scalar {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}

/// Decodes payloads for [`TargetType::Structured`].
pub trait StructuredDecoder: Send + Sync {
    /// Parse a non-blank payload.
    fn decode(&self, payload: &str) -> Result<serde_json::Value, BoxError>;
}

/// Accepts any well-formed JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl StructuredDecoder for JsonDecoder {
    fn decode(&self, payload: &str) -> Result<serde_json::Value, BoxError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Accepts JSON documents that deserialize into `T`.
///
/// The decoded element is still carried as JSON; use
/// [`Scalar::deserialize`] to obtain the `T`.
pub struct SchemaDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SchemaDecoder<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SchemaDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SchemaDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDecoder")
            .field("schema", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> StructuredDecoder for SchemaDecoder<T> {
    fn decode(&self, payload: &str) -> Result<serde_json::Value, BoxError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let _: T = T::deserialize(&value)?;
        Ok(value)
    }
}

/// Decodes raw payloads into [`Scalar`] values.
///
/// Pure: the same payload and tag always produce the same outcome.
#[derive(Clone)]
pub struct ValueDecoder {
    structured: Arc<dyn StructuredDecoder>,
}

impl Default for ValueDecoder {
    fn default() -> Self {
        Self::new(Arc::new(JsonDecoder))
    }
}

impl fmt::Debug for ValueDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDecoder").finish_non_exhaustive()
    }
}

impl ValueDecoder {
    pub fn new(structured: Arc<dyn StructuredDecoder>) -> Self {
        Self { structured }
    }

    /// Decode `payload` read from `key` into `target`.
    ///
    /// Missing and whitespace-only payloads decode to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] when the payload is not a valid textual
    /// form of `target`, or when the structured decoder rejects it.
    pub fn decode(
        &self,
        key: &str,
        payload: Option<&str>,
        target: TargetType,
    ) -> Result<Option<Scalar>, FetchError> {
        let Some(payload) = payload.filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };

        let mut cause = None;
        let decoded = match target {
            TargetType::I8 => payload.parse().ok().map(Scalar::I8),
            TargetType::I16 => payload.parse().ok().map(Scalar::I16),
            TargetType::I32 => payload.parse().ok().map(Scalar::I32),
            TargetType::I64 => payload.parse().ok().map(Scalar::I64),
            TargetType::F32 => payload.parse().ok().map(Scalar::F32),
            TargetType::F64 => payload.parse().ok().map(Scalar::F64),
            TargetType::Bool => parse_bool(payload).map(Scalar::Bool),
            TargetType::String => Some(Scalar::String(payload.to_owned())),
            TargetType::Structured => match self.structured.decode(payload) {
                Ok(value) => Some(Scalar::Structured(value)),
                Err(e) => {
                    cause = Some(e);
                    None
                }
            },
        };

        decoded.map(Some).ok_or_else(|| FetchError::Decode {
            key: key.to_owned(),
            payload: payload.to_owned(),
            target,
            source: cause,
        })
    }
}

fn parse_bool(payload: &str) -> Option<bool> {
    if payload.eq_ignore_ascii_case("true") {
        Some(true)
    } else if payload.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
