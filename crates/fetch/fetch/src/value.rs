use std::collections::HashMap;

use crate::decode::{Scalar, TargetType};
use crate::request::DataKind;

/// Field/value pairs of a hash, in a stable order.
///
/// For projected reads the order is the requested field order; for whole
/// hash reads it is the order the store replied in. Lookups and inserts
/// go through a field index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Option<String>)>,
    index: HashMap<String, usize>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert or overwrite a field, keeping its first position.
    pub fn insert(&mut self, field: impl Into<String>, value: Option<String>) {
        let field = field.into();
        if let Some(&position) = self.index.get(&field) {
            self.entries[position].1 = value;
            return;
        }
        self.index.insert(field.clone(), self.entries.len());
        self.entries.push((field, value));
    }

    /// `None` if the field is not in the map, `Some(None)` if it maps to null.
    pub fn get(&self, field: &str) -> Option<Option<&str>> {
        self.index
            .get(field)
            .map(|&position| self.entries[position].1.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (field, value) in iter {
            map.insert(field, value);
        }
        map
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, Option<String>);
    type IntoIter = std::vec::IntoIter<(String, Option<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The value fetched (or substituted) for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// A STRING key. `None` when the stored payload was blank.
    Scalar(Option<Scalar>),
    /// A HASH key, values kept as raw strings.
    Hash(FieldMap),
    /// A LIST, SET or ZSET key. Blank members decode to `None`.
    Elements(Vec<Option<Scalar>>),
}

impl Fetched {
    /// Shorthand for a present scalar value.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Self::Scalar(Some(value.into()))
    }

    /// Shorthand for a list of present elements.
    pub fn elements<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Scalar>,
    {
        Self::Elements(values.into_iter().map(|v| Some(v.into())).collect())
    }

    /// Shorthand for a hash of present fields.
    pub fn hash<I, F, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        Self::Hash(
            pairs
                .into_iter()
                .map(|(f, v)| (f.into(), Some(v.into())))
                .collect(),
        )
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => s.as_ref(),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&FieldMap> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&[Option<Scalar>]> {
        match self {
            Self::Elements(e) => Some(e),
            _ => None,
        }
    }

    /// Present elements as strings, skipping blanks and non-string elements.
    pub fn strings(&self) -> Vec<&str> {
        self.as_elements()
            .unwrap_or_default()
            .iter()
            .flatten()
            .filter_map(Scalar::as_str)
            .collect()
    }

    /// Whether this value has the shape of `kind` and every element is of
    /// type `target`.
    pub fn conforms_to(&self, kind: DataKind, target: TargetType) -> bool {
        match (kind, self) {
            (DataKind::String, Self::Scalar(s)) => {
                s.as_ref().is_none_or(|s| s.target_type() == target)
            }
            (DataKind::Hash, Self::Hash(_)) => true,
            (DataKind::List | DataKind::Set | DataKind::ZSet, Self::Elements(items)) => {
                items.iter().flatten().all(|s| s.target_type() == target)
            }
            _ => false,
        }
    }
}

/// The outcome of a fetch: one value per distinct requested key that the
/// store returned or the fallback supplied.
///
/// Iteration follows the first occurrence of each key in the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    order: Vec<String>,
    values: HashMap<String, Fetched>,
}

impl FetchResult {
    /// Arrange `values` in the order `requested` names them. Keys that are
    /// not requested are dropped.
    pub(crate) fn assemble(requested: &[String], mut values: HashMap<String, Fetched>) -> Self {
        let mut order = Vec::with_capacity(values.len());
        let mut ordered = HashMap::with_capacity(values.len());
        for key in requested {
            if let Some(value) = values.remove(key) {
                order.push(key.clone());
                ordered.insert(key.clone(), value);
            }
        }
        Self {
            order,
            values: ordered,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Fetched> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fetched)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }

    pub fn into_map(self) -> HashMap<String, Fetched> {
        self.values
    }
}

impl IntoIterator for FetchResult {
    type Item = (String, Fetched);
    type IntoIter = std::vec::IntoIter<(String, Fetched)>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.order
            .into_iter()
            .filter_map(|k| self.values.remove(&k).map(|v| (k, v)))
            .collect::<Vec<_>>()
            .into_iter()
    }
}
