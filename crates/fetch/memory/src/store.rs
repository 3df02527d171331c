use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use pipefetch::testing::Fixture;
use pipefetch::{Command, Reply, StoreError};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A single value in the in-memory keyspace.
#[derive(Debug, Clone)]
enum Entry {
    String(String),
    /// Field/value pairs in insertion order.
    Hash(Vec<(String, String)>),
    List(Vec<String>),
    Set(HashSet<String>),
    /// Members kept sorted by score, then member.
    ZSet(Vec<(String, f64)>),
}

/// In-memory keyspace answering the read commands the fetcher issues with
/// Redis semantics.
///
/// Writes exist only to seed test data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string value, replacing whatever the key held.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Entry::String(value.into()));
    }

    /// Set hash fields, creating the hash if needed.
    ///
    /// # Errors
    ///
    /// Fails if the key holds another kind.
    pub fn hset<F, V>(
        &self,
        key: &str,
        pairs: impl IntoIterator<Item = (F, V)>,
    ) -> Result<(), StoreError>
    where
        F: Into<String>,
        V: Into<String>,
    {
        let mut entry = self
            .data
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Hash(Vec::new()));
        let Entry::Hash(fields) = entry.value_mut() else {
            return Err(StoreError::protocol(WRONGTYPE));
        };
        let mut positions: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, (f, _))| (f.clone(), i))
            .collect();
        for (field, value) in pairs {
            let (field, value) = (field.into(), value.into());
            match positions.get(&field) {
                Some(&i) => fields[i].1 = value,
                None => {
                    positions.insert(field.clone(), fields.len());
                    fields.push((field, value));
                }
            }
        }
        Ok(())
    }

    /// Append values to the tail of a list.
    ///
    /// # Errors
    ///
    /// Fails if the key holds another kind.
    pub fn rpush<V: Into<String>>(
        &self,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .data
            .entry(key.to_owned())
            .or_insert_with(|| Entry::List(Vec::new()));
        let Entry::List(items) = entry.value_mut() else {
            return Err(StoreError::protocol(WRONGTYPE));
        };
        items.extend(values.into_iter().map(Into::into));
        Ok(())
    }

    /// Add members to a set.
    ///
    /// # Errors
    ///
    /// Fails if the key holds another kind.
    pub fn sadd<V: Into<String>>(
        &self,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .data
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        let Entry::Set(set) = entry.value_mut() else {
            return Err(StoreError::protocol(WRONGTYPE));
        };
        set.extend(members.into_iter().map(Into::into));
        Ok(())
    }

    /// Add or re-score members of a sorted set.
    ///
    /// # Errors
    ///
    /// Fails if the key holds another kind.
    pub fn zadd<V: Into<String>>(
        &self,
        key: &str,
        members: impl IntoIterator<Item = (V, f64)>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .data
            .entry(key.to_owned())
            .or_insert_with(|| Entry::ZSet(Vec::new()));
        let Entry::ZSet(scored) = entry.value_mut() else {
            return Err(StoreError::protocol(WRONGTYPE));
        };
        // Later scores win, for members already present and repeated ones.
        let mut updates: HashMap<String, f64> = HashMap::new();
        for (member, score) in members {
            updates.insert(member.into(), score);
        }
        scored.retain(|(m, _)| !updates.contains_key(m));
        scored.extend(updates);
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(())
    }

    /// Remove a key of any kind. Returns `true` if it existed.
    pub fn del(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Load every key described by a conformance [`Fixture`].
    ///
    /// # Errors
    ///
    /// Fails if a fixture key already holds another kind.
    pub fn seed(&self, fixture: &Fixture) -> Result<(), StoreError> {
        for (key, value) in fixture.strings() {
            self.set(key, value);
        }
        for (key, fields) in fixture.hashes() {
            self.hset(&key, fields)?;
        }
        for (key, items) in fixture.lists() {
            self.rpush(&key, items)?;
        }
        for (key, members) in fixture.sets() {
            self.sadd(&key, members)?;
        }
        for (key, members) in fixture.sorted_sets() {
            self.zadd(&key, members)?;
        }
        Ok(())
    }

    /// Answer a single command.
    pub fn execute(&self, command: &Command) -> Reply {
        match command {
            Command::Exists { key } => Reply::Integer(i64::from(self.data.contains_key(key))),
            Command::MGet { keys } => Reply::Array(
                keys.iter()
                    .map(|key| match self.data.get(key).as_deref() {
                        Some(Entry::String(v)) => Reply::Bulk(v.clone()),
                        _ => Reply::Nil,
                    })
                    .collect(),
            ),
            Command::HMGet { key, fields } => match self.data.get(key).as_deref() {
                None => Reply::Array(vec![Reply::Nil; fields.len()]),
                Some(Entry::Hash(pairs)) => {
                    let lookup: HashMap<&str, &str> = pairs
                        .iter()
                        .map(|(f, v)| (f.as_str(), v.as_str()))
                        .collect();
                    Reply::Array(
                        fields
                            .iter()
                            .map(|field| {
                                lookup
                                    .get(field.as_str())
                                    .map_or(Reply::Nil, |v| Reply::Bulk((*v).to_owned()))
                            })
                            .collect(),
                    )
                }
                Some(_) => Reply::Error(WRONGTYPE.to_owned()),
            },
            Command::HGetAll { key } => match self.data.get(key).as_deref() {
                None => Reply::Array(Vec::new()),
                Some(Entry::Hash(pairs)) => Reply::Array(
                    pairs
                        .iter()
                        .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                        .collect(),
                ),
                Some(_) => Reply::Error(WRONGTYPE.to_owned()),
            },
            Command::LRange { key, start, end } => match self.data.get(key).as_deref() {
                None => Reply::Array(Vec::new()),
                Some(Entry::List(items)) => bulk_array(
                    items[range(items.len(), *start, *end)].iter().cloned(),
                ),
                Some(_) => Reply::Error(WRONGTYPE.to_owned()),
            },
            Command::SMembers { key } => match self.data.get(key).as_deref() {
                None => Reply::Array(Vec::new()),
                Some(Entry::Set(members)) => bulk_array(members.iter().cloned()),
                Some(_) => Reply::Error(WRONGTYPE.to_owned()),
            },
            Command::ZRange { key, start, end } => match self.data.get(key).as_deref() {
                None => Reply::Array(Vec::new()),
                Some(Entry::ZSet(scored)) => bulk_array(
                    scored[range(scored.len(), *start, *end)]
                        .iter()
                        .map(|(m, _)| m.clone()),
                ),
                Some(_) => Reply::Error(WRONGTYPE.to_owned()),
            },
        }
    }
}

fn bulk_array(items: impl Iterator<Item = String>) -> Reply {
    Reply::Array(items.map(Reply::Bulk).collect())
}

/// Resolve inclusive `LRANGE`/`ZRANGE` indices against a length.
fn range(len: usize, start: i64, end: i64) -> std::ops::Range<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { (start + len).max(0) } else { start };
    let end = if end < 0 { end + len } else { end.min(len - 1) };
    if start > end || start >= len {
        return 0..0;
    }
    match (usize::try_from(start), usize::try_from(end)) {
        (Ok(start), Ok(end)) => start..end + 1,
        _ => 0..0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(reply: Reply) -> Vec<String> {
        match reply {
            Reply::Array(items) => items
                .into_iter()
                .map(|r| match r {
                    Reply::Bulk(s) => s,
                    other => panic!("expected bulk, got {other:?}"),
                })
                .collect(),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn range_matches_redis_index_rules() {
        assert_eq!(range(4, 0, 1), 0..2);
        assert_eq!(range(4, 0, -1), 0..4);
        assert_eq!(range(4, -2, -1), 2..4);
        assert_eq!(range(4, -100, 100), 0..4);
        assert_eq!(range(4, 3, 1), 0..0);
        assert_eq!(range(4, 5, 10), 0..0);
        assert_eq!(range(0, 0, -1), 0..0);
    }

    #[test]
    fn exists_and_mget() {
        let store = MemoryStore::new();
        store.set("s:1", "a");
        store.rpush("l:1", ["x"]).unwrap();

        assert_eq!(
            store.execute(&Command::Exists { key: "s:1".into() }),
            Reply::Integer(1)
        );
        assert_eq!(
            store.execute(&Command::Exists { key: "nope".into() }),
            Reply::Integer(0)
        );
        assert_eq!(
            store.execute(&Command::MGet {
                keys: vec!["s:1".into(), "l:1".into(), "nope".into()]
            }),
            Reply::Array(vec![Reply::Bulk("a".into()), Reply::Nil, Reply::Nil])
        );
    }

    #[test]
    fn hash_reads() {
        let store = MemoryStore::new();
        store.hset("h:1", [("f1", "v1"), ("f2", "v2")]).unwrap();
        store.hset("h:1", [("f1", "v1b")]).unwrap();

        assert_eq!(
            store.execute(&Command::HMGet {
                key: "h:1".into(),
                fields: vec!["f2".into(), "fX".into()]
            }),
            Reply::Array(vec![Reply::Bulk("v2".into()), Reply::Nil])
        );
        assert_eq!(
            strings(store.execute(&Command::HGetAll { key: "h:1".into() })),
            vec!["f1", "v1b", "f2", "v2"]
        );
        assert_eq!(
            store.execute(&Command::HMGet {
                key: "missing".into(),
                fields: vec!["a".into(), "b".into()]
            }),
            Reply::Array(vec![Reply::Nil, Reply::Nil])
        );
    }

    #[test]
    fn sorted_set_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store
            .zadd("z:1", [("b", 2.0), ("c", 1.0), ("a", 2.0)])
            .unwrap();
        store.zadd("z:1", [("c", 3.0)]).unwrap();

        let all = store.execute(&Command::ZRange {
            key: "z:1".into(),
            start: 0,
            end: -1,
        });
        assert_eq!(strings(all), vec!["a", "b", "c"]);
    }

    #[test]
    fn zadd_repeated_member_keeps_last_score() {
        let store = MemoryStore::new();
        store
            .zadd("z:1", [("a", 5.0), ("b", 2.0), ("a", 1.0)])
            .unwrap();

        let all = store.execute(&Command::ZRange {
            key: "z:1".into(),
            start: 0,
            end: -1,
        });
        assert_eq!(strings(all), vec!["a", "b"]);
    }

    #[test]
    fn wrong_kind_is_an_error_reply() {
        let store = MemoryStore::new();
        store.set("s:1", "a");

        let reply = store.execute(&Command::LRange {
            key: "s:1".into(),
            start: 0,
            end: -1,
        });
        assert!(matches!(reply, Reply::Error(ref m) if m.starts_with("WRONGTYPE")));
        assert!(store.sadd("s:1", ["x"]).is_err());
    }

    #[test]
    fn seed_loads_fixture() {
        let store = MemoryStore::new();
        let fixture = Fixture::new("t");
        store.seed(&fixture).unwrap();

        let members = strings(store.execute(&Command::SMembers {
            key: fixture.key("st:1"),
        }));
        assert_eq!(members.len(), 3);
        assert!(store.del(&fixture.key("s:1")));
        assert!(!store.del(&fixture.key("s:1")));
    }
}
