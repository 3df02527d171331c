//! Per-kind read strategies.
//!
//! Each strategy stages the read commands for its kind on a [`Pipeline`]
//! and, once the batch is flushed, turns the replies into [`Fetched`]
//! values. Strategies move from staged to flushed exactly once; collecting
//! a strategy that staged nothing yields no values.

use crate::command::{Command, Reply};
use crate::decode::{TargetType, ValueDecoder};
use crate::error::{FetchError, StoreError};
use crate::request::{DataKind, KindSpec};
use crate::session::{Pipeline, ResponseHandle};
use crate::value::{FieldMap, Fetched};

/// Stages reads for one kind and shapes their replies.
pub trait FetchStrategy: Send {
    fn kind(&self) -> DataKind;

    /// Stage the reads for `keys`. Positional replies are paired with keys
    /// in this order.
    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]);

    /// Claim and decode the replies after the pipeline was flushed.
    ///
    /// Keys whose value does not exist in the store may be omitted.
    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError>;
}

/// Select the strategy for a request's kind.
pub fn for_spec(spec: &KindSpec, target: TargetType) -> Box<dyn FetchStrategy> {
    match spec {
        KindSpec::String => Box::new(StringStrategy::new(target)),
        KindSpec::Hash { fields } => Box::new(HashStrategy::new(fields.clone())),
        KindSpec::List { start, end } => Box::new(ListStrategy::new(*start, *end, target)),
        KindSpec::Set => Box::new(SetStrategy::new(target)),
        KindSpec::ZSet { start, end } => Box::new(ZSetStrategy::new(*start, *end, target)),
    }
}

/// One `MGET` for all keys.
#[derive(Debug)]
pub struct StringStrategy {
    target: TargetType,
    staged: Option<(Vec<String>, ResponseHandle)>,
}

impl StringStrategy {
    pub fn new(target: TargetType) -> Self {
        Self {
            target,
            staged: None,
        }
    }
}

impl FetchStrategy for StringStrategy {
    fn kind(&self) -> DataKind {
        DataKind::String
    }

    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]) {
        // MGET with no keys is a wrong-arity error.
        if keys.is_empty() {
            return;
        }
        let handle = pipeline.stage(Command::MGet {
            keys: keys.to_vec(),
        });
        self.staged = Some((keys.to_vec(), handle));
    }

    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        let Some((keys, handle)) = self.staged.take() else {
            return Ok(Vec::new());
        };
        let replies = pipeline.resolve(handle)?.into_array()?;
        if replies.len() != keys.len() {
            return Err(StoreError::protocol(format!(
                "MGET of {} keys returned {} values",
                keys.len(),
                replies.len()
            ))
            .into());
        }

        let mut values = Vec::with_capacity(keys.len());
        for (key, reply) in keys.into_iter().zip(replies) {
            let Some(payload) = reply.into_payload()? else {
                continue;
            };
            let decoded = decoder.decode(&key, Some(&payload), self.target)?;
            values.push((key, Fetched::Scalar(decoded)));
        }
        Ok(values)
    }
}

/// `HMGET` per key when fields are given, `HGETALL` otherwise.
#[derive(Debug)]
pub struct HashStrategy {
    fields: Vec<String>,
    staged: Vec<(String, ResponseHandle)>,
}

impl HashStrategy {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            staged: Vec::new(),
        }
    }

    fn project(&self, key: &str, reply: Reply) -> Result<FieldMap, StoreError> {
        let values = reply.into_array()?;
        if values.len() != self.fields.len() {
            return Err(StoreError::protocol(format!(
                "HMGET {key} of {} fields returned {} values",
                self.fields.len(),
                values.len()
            )));
        }
        let mut map = FieldMap::with_capacity(self.fields.len());
        for (field, value) in self.fields.iter().zip(values) {
            map.insert(field.clone(), value.into_payload()?);
        }
        Ok(map)
    }

    fn whole(key: &str, reply: Reply) -> Result<FieldMap, StoreError> {
        let flat = reply.into_array()?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::protocol(format!(
                "HGETALL {key} returned an odd number of elements"
            )));
        }
        let mut map = FieldMap::with_capacity(flat.len() / 2);
        let mut items = flat.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            let field = field
                .into_payload()?
                .ok_or_else(|| StoreError::protocol(format!("HGETALL {key} returned a nil field")))?;
            map.insert(field, value.into_payload()?);
        }
        Ok(map)
    }
}

impl FetchStrategy for HashStrategy {
    fn kind(&self) -> DataKind {
        DataKind::Hash
    }

    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]) {
        for key in keys {
            let command = if self.fields.is_empty() {
                Command::HGetAll { key: key.clone() }
            } else {
                Command::HMGet {
                    key: key.clone(),
                    fields: self.fields.clone(),
                }
            };
            self.staged.push((key.clone(), pipeline.stage(command)));
        }
    }

    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        _decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        let staged = std::mem::take(&mut self.staged);
        let mut values = Vec::with_capacity(staged.len());
        for (key, handle) in staged {
            let reply = pipeline.resolve(handle)?;
            let map = if self.fields.is_empty() {
                Self::whole(&key, reply)?
            } else {
                self.project(&key, reply)?
            };
            values.push((key, Fetched::Hash(map)));
        }
        Ok(values)
    }
}

/// Claim one array reply per key and decode every element.
fn collect_elements(
    staged: Vec<(String, ResponseHandle)>,
    pipeline: &mut dyn Pipeline,
    decoder: &ValueDecoder,
    target: TargetType,
) -> Result<Vec<(String, Fetched)>, FetchError> {
    let mut values = Vec::with_capacity(staged.len());
    for (key, handle) in staged {
        let replies = pipeline.resolve(handle)?.into_array()?;
        let mut elements = Vec::with_capacity(replies.len());
        for reply in replies {
            let payload = reply.into_payload()?;
            elements.push(decoder.decode(&key, payload.as_deref(), target)?);
        }
        values.push((key, Fetched::Elements(elements)));
    }
    Ok(values)
}

/// `LRANGE key start end` per key; head-to-tail order.
#[derive(Debug)]
pub struct ListStrategy {
    start: i64,
    end: i64,
    target: TargetType,
    staged: Vec<(String, ResponseHandle)>,
}

impl ListStrategy {
    pub fn new(start: i64, end: i64, target: TargetType) -> Self {
        Self {
            start,
            end,
            target,
            staged: Vec::new(),
        }
    }
}

impl FetchStrategy for ListStrategy {
    fn kind(&self) -> DataKind {
        DataKind::List
    }

    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]) {
        for key in keys {
            let handle = pipeline.stage(Command::LRange {
                key: key.clone(),
                start: self.start,
                end: self.end,
            });
            self.staged.push((key.clone(), handle));
        }
    }

    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        collect_elements(std::mem::take(&mut self.staged), pipeline, decoder, self.target)
    }
}

/// `SMEMBERS key` per key; member order is whatever the store returns.
#[derive(Debug)]
pub struct SetStrategy {
    target: TargetType,
    staged: Vec<(String, ResponseHandle)>,
}

impl SetStrategy {
    pub fn new(target: TargetType) -> Self {
        Self {
            target,
            staged: Vec::new(),
        }
    }
}

impl FetchStrategy for SetStrategy {
    fn kind(&self) -> DataKind {
        DataKind::Set
    }

    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]) {
        for key in keys {
            let handle = pipeline.stage(Command::SMembers { key: key.clone() });
            self.staged.push((key.clone(), handle));
        }
    }

    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        collect_elements(std::mem::take(&mut self.staged), pipeline, decoder, self.target)
    }
}

/// `ZRANGE key start end` per key; ascending score, members only.
#[derive(Debug)]
pub struct ZSetStrategy {
    start: i64,
    end: i64,
    target: TargetType,
    staged: Vec<(String, ResponseHandle)>,
}

impl ZSetStrategy {
    pub fn new(start: i64, end: i64, target: TargetType) -> Self {
        Self {
            start,
            end,
            target,
            staged: Vec::new(),
        }
    }
}

impl FetchStrategy for ZSetStrategy {
    fn kind(&self) -> DataKind {
        DataKind::ZSet
    }

    fn stage(&mut self, pipeline: &mut dyn Pipeline, keys: &[String]) {
        for key in keys {
            let handle = pipeline.stage(Command::ZRange {
                key: key.clone(),
                start: self.start,
                end: self.end,
            });
            self.staged.push((key.clone(), handle));
        }
    }

    fn collect(
        &mut self,
        pipeline: &mut dyn Pipeline,
        decoder: &ValueDecoder,
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        collect_elements(std::mem::take(&mut self.staged), pipeline, decoder, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Scalar;
    use crate::error::StoreErrorKind;
    use crate::session::PipelineSession;
    use crate::session::tests::ScriptedProvider;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.to_owned())
    }

    fn fake_store(command: &Command) -> Reply {
        match command {
            Command::MGet { keys } => Reply::Array(
                keys.iter()
                    .map(|k| match k.as_str() {
                        "s:1" => bulk("1"),
                        "s:2" => bulk("  "),
                        "s:bad" => bulk("x"),
                        _ => Reply::Nil,
                    })
                    .collect(),
            ),
            Command::HMGet { key, fields } if key == "h:1" => Reply::Array(
                fields
                    .iter()
                    .map(|f| if f == "f1" { bulk("v1") } else { Reply::Nil })
                    .collect(),
            ),
            Command::HMGet { .. } => Reply::Array(vec![bulk("only-one")]),
            Command::HGetAll { key } if key == "h:1" => {
                Reply::Array(vec![bulk("f2"), bulk("v2"), bulk("f1"), bulk("v1")])
            }
            Command::HGetAll { .. } => Reply::Array(vec![]),
            Command::LRange { key, .. } if key == "l:wrong" => Reply::Error(
                "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
            ),
            Command::LRange { .. } | Command::ZRange { .. } | Command::SMembers { .. } => {
                Reply::Array(vec![bulk("3"), bulk("1"), bulk("2")])
            }
            Command::Exists { .. } => Reply::Integer(1),
        }
    }

    async fn run(
        strategy: &mut dyn FetchStrategy,
        keys: &[String],
    ) -> Result<Vec<(String, Fetched)>, FetchError> {
        let provider = ScriptedProvider::new(fake_store);
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();
        strategy.stage(&mut session, keys);
        session.flush().await?;
        strategy.collect(&mut session, &ValueDecoder::default())
    }

    #[tokio::test]
    async fn string_pairs_positions_and_skips_nil() {
        let mut strategy = StringStrategy::new(TargetType::I32);
        let values = run(&mut strategy, &keys(&["s:1", "s:missing", "s:2"]))
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                ("s:1".to_owned(), Fetched::Scalar(Some(Scalar::I32(1)))),
                ("s:2".to_owned(), Fetched::Scalar(None)),
            ]
        );
    }

    #[tokio::test]
    async fn string_decode_failure_names_key() {
        let mut strategy = StringStrategy::new(TargetType::I64);
        let err = run(&mut strategy, &keys(&["s:bad"])).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { ref key, .. } if key == "s:bad"));
    }

    #[tokio::test]
    async fn string_with_no_keys_stages_nothing() {
        let mut strategy = StringStrategy::new(TargetType::String);
        let values = run(&mut strategy, &[]).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn hash_projection_keeps_field_order_and_nulls() {
        let mut strategy = HashStrategy::new(keys(&["fX", "f1"]));
        let values = run(&mut strategy, &keys(&["h:1"])).await.unwrap();
        let map = values[0].1.as_hash().unwrap();
        assert_eq!(map.fields().collect::<Vec<_>>(), vec!["fX", "f1"]);
        assert_eq!(map.get("fX"), Some(None));
        assert_eq!(map.get("f1"), Some(Some("v1")));
    }

    #[tokio::test]
    async fn hash_projection_rejects_short_reply() {
        let mut strategy = HashStrategy::new(keys(&["a", "b"]));
        let err = run(&mut strategy, &keys(&["h:other"])).await.unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Protocol));
    }

    #[tokio::test]
    async fn hash_without_fields_reads_whole_hash() {
        let mut strategy = HashStrategy::new(Vec::new());
        let values = run(&mut strategy, &keys(&["h:1", "h:empty"])).await.unwrap();
        let whole = values[0].1.as_hash().unwrap();
        assert_eq!(whole.fields().collect::<Vec<_>>(), vec!["f2", "f1"]);
        assert!(values[1].1.as_hash().unwrap().is_empty());
    }

    #[tokio::test]
    async fn element_strategies_preserve_reply_order() {
        let mut list = ListStrategy::new(0, -1, TargetType::I8);
        let mut zset = ZSetStrategy::new(0, -1, TargetType::I8);
        let mut set = SetStrategy::new(TargetType::I8);

        let strategies: [&mut dyn FetchStrategy; 3] = [&mut list, &mut zset, &mut set];
        for strategy in strategies {
            let values = run(strategy, &keys(&["k"])).await.unwrap();
            let expected = Fetched::elements([3i8, 1, 2].map(Scalar::I8));
            assert_eq!(values, vec![("k".to_owned(), expected)]);
        }
    }

    #[tokio::test]
    async fn element_error_reply_aborts() {
        let mut strategy = ListStrategy::new(0, -1, TargetType::String);
        let err = run(&mut strategy, &keys(&["l:wrong"])).await.unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Protocol));
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[test]
    fn for_spec_selects_matching_kind() {
        let cases = [
            (KindSpec::String, DataKind::String),
            (KindSpec::Hash { fields: vec![] }, DataKind::Hash),
            (KindSpec::List { start: 0, end: 1 }, DataKind::List),
            (KindSpec::Set, DataKind::Set),
            (KindSpec::ZSet { start: 0, end: 1 }, DataKind::ZSet),
        ];
        for (spec, kind) in cases {
            assert_eq!(for_spec(&spec, TargetType::String).kind(), kind);
        }
    }
}
