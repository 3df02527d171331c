//! Backend conformance suite.
//!
//! Seed a store with the data described by a [`Fixture`], build a
//! [`BatchFetcher`] over a provider for that store, and call
//! [`run_fetch_conformance_tests`].

use std::collections::HashSet;

use crate::decode::{Scalar, TargetType};
use crate::error::{FetchError, StoreErrorKind};
use crate::fetcher::BatchFetcher;
use crate::provider::ConnectionProvider;
use crate::request::FetchRequest;
use crate::value::Fetched;

/// Keys and values every conforming store must hold before the suite runs.
///
/// All keys are namespaced under `prefix` so suites can share a server.
#[derive(Debug, Clone)]
pub struct Fixture {
    prefix: String,
}

impl Fixture {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }

    pub fn strings(&self) -> Vec<(String, String)> {
        [
            ("s:1", "a"),
            ("s:2", "b"),
            ("n:1", "42"),
            ("n:2", "-7"),
            ("f:1", "2.5e3"),
            ("b:1", "TRUE"),
            ("j:1", r#"{"id":1,"tags":["x"]}"#),
            ("blank:1", "   "),
            ("bad:1", "notanint"),
        ]
        .into_iter()
        .map(|(k, v)| (self.key(k), v.to_owned()))
        .collect()
    }

    pub fn hashes(&self) -> Vec<(String, Vec<(String, String)>)> {
        let fields = [("f1", "v1"), ("f2", "v2"), ("f3", "v3")]
            .into_iter()
            .map(|(f, v)| (f.to_owned(), v.to_owned()))
            .collect();
        vec![(self.key("h:1"), fields)]
    }

    pub fn lists(&self) -> Vec<(String, Vec<String>)> {
        vec![
            (self.key("l:1"), owned(&["a", "b", "c", "d"])),
            (self.key("ln:1"), owned(&["1", "2", "3"])),
        ]
    }

    pub fn sets(&self) -> Vec<(String, Vec<String>)> {
        vec![(self.key("st:1"), owned(&["x", "y", "z"]))]
    }

    /// Members deliberately listed out of score order.
    pub fn sorted_sets(&self) -> Vec<(String, Vec<(String, f64)>)> {
        vec![(
            self.key("z:1"),
            vec![
                ("m3".to_owned(), 3.0),
                ("m1".to_owned(), 1.0),
                ("m2".to_owned(), 2.0),
            ],
        )]
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Run the full fetch conformance suite against a seeded store.
///
/// # Errors
///
/// Returns the first unexpected fetch error.
pub async fn run_fetch_conformance_tests<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fixture: &Fixture,
) -> Result<(), FetchError> {
    test_strings_with_fallback(fetcher, fixture).await?;
    test_strings_without_fallback(fetcher, fixture).await?;
    test_typed_scalars(fetcher, fixture).await?;
    test_hash_projection(fetcher, fixture).await?;
    test_hash_whole(fetcher, fixture).await?;
    test_list_ranges(fetcher, fixture).await?;
    test_set_members(fetcher, fixture).await?;
    test_sorted_set_order(fetcher, fixture).await?;
    test_decode_failure(fetcher, fixture).await?;
    test_wrong_type(fetcher, fixture).await?;
    test_idempotence(fetcher, fixture).await?;
    Ok(())
}

async fn test_strings_with_fallback<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::strings([fx.key("s:1"), fx.key("s:2"), fx.key("s:3")])
        .with_fallback(|_| Ok(Some(Fetched::scalar("X"))));
    let result = fetcher.fetch(&request).await?;

    assert_eq!(result.len(), 3);
    assert_eq!(result.get(&fx.key("s:1")), Some(&Fetched::scalar("a")));
    assert_eq!(result.get(&fx.key("s:2")), Some(&Fetched::scalar("b")));
    assert_eq!(result.get(&fx.key("s:3")), Some(&Fetched::scalar("X")));
    Ok(())
}

async fn test_strings_without_fallback<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::strings([fx.key("s:1"), fx.key("s:2"), fx.key("s:3")]);
    let result = fetcher.fetch(&request).await?;

    assert_eq!(result.len(), 2);
    assert!(!result.contains_key(&fx.key("s:3")), "absent key without fallback is omitted");
    Ok(())
}

async fn test_typed_scalars<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let ints = fetcher
        .fetch(&FetchRequest::strings([fx.key("n:1"), fx.key("n:2")]).with_target(TargetType::I64))
        .await?;
    assert_eq!(ints.get(&fx.key("n:1")), Some(&Fetched::scalar(42i64)));
    assert_eq!(ints.get(&fx.key("n:2")), Some(&Fetched::scalar(-7i64)));

    let float = fetcher
        .fetch(&FetchRequest::strings([fx.key("f:1")]).with_target(TargetType::F64))
        .await?;
    assert_eq!(float.get(&fx.key("f:1")), Some(&Fetched::scalar(2500.0)));

    let flag = fetcher
        .fetch(&FetchRequest::strings([fx.key("b:1")]).with_target(TargetType::Bool))
        .await?;
    assert_eq!(flag.get(&fx.key("b:1")), Some(&Fetched::scalar(true)));

    let doc = fetcher
        .fetch(&FetchRequest::strings([fx.key("j:1")]).with_target(TargetType::Structured))
        .await?;
    let json = doc
        .get(&fx.key("j:1"))
        .and_then(Fetched::as_scalar)
        .and_then(Scalar::as_structured)
        .cloned();
    assert_eq!(json, Some(serde_json::json!({"id": 1, "tags": ["x"]})));

    let blank = fetcher
        .fetch(&FetchRequest::strings([fx.key("blank:1")]).with_target(TargetType::I32))
        .await?;
    assert_eq!(blank.get(&fx.key("blank:1")), Some(&Fetched::Scalar(None)));
    Ok(())
}

async fn test_hash_projection<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::hashes([fx.key("h:1"), fx.key("h:2")], ["f1", "fX"])
        .with_fallback(|_| Ok(Some(Fetched::hash([("stub", "1")]))));
    let result = fetcher.fetch(&request).await?;

    let h1 = result.get(&fx.key("h:1")).and_then(Fetched::as_hash);
    let h1 = h1.expect("h:1 should be fetched");
    assert_eq!(h1.len(), 2);
    assert_eq!(h1.fields().collect::<Vec<_>>(), vec!["f1", "fX"]);
    assert_eq!(h1.get("f1"), Some(Some("v1")));
    assert_eq!(h1.get("fX"), Some(None));

    assert_eq!(
        result.get(&fx.key("h:2")),
        Some(&Fetched::hash([("stub", "1")]))
    );
    Ok(())
}

async fn test_hash_whole<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let result = fetcher
        .fetch(&FetchRequest::hashes([fx.key("h:1")], Vec::<String>::new()))
        .await?;
    let hash = result
        .get(&fx.key("h:1"))
        .and_then(Fetched::as_hash)
        .expect("h:1 should be fetched");

    let fields: HashSet<_> = hash.fields().collect();
    assert_eq!(fields, HashSet::from(["f1", "f2", "f3"]));
    assert_eq!(hash.get("f3"), Some(Some("v3")));
    Ok(())
}

async fn test_list_ranges<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let head = fetcher.fetch(&FetchRequest::lists([fx.key("l:1")], 0, 1)).await?;
    assert_eq!(head.get(&fx.key("l:1")), Some(&Fetched::elements(["a", "b"])));

    let tail = fetcher.fetch(&FetchRequest::lists([fx.key("l:1")], -2, -1)).await?;
    assert_eq!(tail.get(&fx.key("l:1")), Some(&Fetched::elements(["c", "d"])));

    let typed = fetcher
        .fetch(&FetchRequest::lists([fx.key("ln:1")], 0, -1).with_target(TargetType::I16))
        .await?;
    assert_eq!(
        typed.get(&fx.key("ln:1")),
        Some(&Fetched::elements([1i16, 2, 3].map(Scalar::I16)))
    );
    Ok(())
}

async fn test_set_members<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let result = fetcher.fetch(&FetchRequest::sets([fx.key("st:1")])).await?;
    let members: HashSet<_> = result
        .get(&fx.key("st:1"))
        .map(Fetched::strings)
        .unwrap_or_default()
        .into_iter()
        .collect();
    assert_eq!(members, HashSet::from(["x", "y", "z"]));
    Ok(())
}

async fn test_sorted_set_order<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let result = fetcher
        .fetch(&FetchRequest::sorted_sets([fx.key("z:1")], 0, -1))
        .await?;
    assert_eq!(
        result.get(&fx.key("z:1")),
        Some(&Fetched::elements(["m1", "m2", "m3"]))
    );
    Ok(())
}

async fn test_decode_failure<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::strings([fx.key("bad:1")]).with_target(TargetType::I32);
    match fetcher.fetch(&request).await {
        Err(FetchError::Decode {
            key,
            payload,
            target,
            ..
        }) => {
            assert_eq!(key, fx.key("bad:1"));
            assert_eq!(payload, "notanint");
            assert_eq!(target, TargetType::I32);
            Ok(())
        }
        Err(other) => Err(other),
        Ok(result) => panic!("expected a decode error, got {result:?}"),
    }
}

async fn test_wrong_type<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::lists([fx.key("s:1")], 0, -1);
    match fetcher.fetch(&request).await {
        Err(e) if e.store_kind() == Some(StoreErrorKind::Protocol) => Ok(()),
        Err(other) => Err(other),
        Ok(result) => panic!("LRANGE on a string key should fail, got {result:?}"),
    }
}

async fn test_idempotence<P: ConnectionProvider>(
    fetcher: &BatchFetcher<P>,
    fx: &Fixture,
) -> Result<(), FetchError> {
    let request = FetchRequest::sorted_sets([fx.key("z:1"), fx.key("z:missing")], 0, 1)
        .with_fallback(|_| Ok(Some(Fetched::Elements(Vec::new()))));
    let first = fetcher.fetch(&request).await?;
    let second = fetcher.fetch(&request).await?;
    assert_eq!(first, second);
    Ok(())
}
