use tracing::{debug, instrument};

use crate::config::FetchConfig;
use crate::decode::ValueDecoder;
use crate::error::FetchError;
use crate::gate::{ExistenceGate, GateOutcome};
use crate::provider::ConnectionProvider;
use crate::request::FetchRequest;
use crate::session::PipelineSession;
use crate::strategy;
use crate::value::FetchResult;

/// Runs batch fetches against connections from a [`ConnectionProvider`].
///
/// Every call acquires its own session and releases it on every exit path,
/// so one fetcher can serve concurrent callers. Each call performs at most
/// two round-trips: the existence probe (only when a fallback is supplied)
/// and the value read.
///
/// # Examples
///
/// ```ignore
/// use pipefetch::{BatchFetcher, FetchRequest, Fetched};
///
/// let fetcher = BatchFetcher::new(provider);
/// let request = FetchRequest::strings(["s:1", "s:2", "s:3"])
///     .with_fallback(|_| Ok(Some(Fetched::scalar("X"))));
/// let result = fetcher.fetch(&request).await?;
/// ```
#[derive(Debug)]
pub struct BatchFetcher<P> {
    provider: P,
    decoder: ValueDecoder,
    config: FetchConfig,
}

impl<P: ConnectionProvider> BatchFetcher<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            decoder: ValueDecoder::default(),
            config: FetchConfig::default(),
        }
    }

    /// Replace the decoder, e.g. to install a schema-checking structured decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: ValueDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every key in `request`.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::Validation`] before any I/O, with
    /// [`FetchError::Store`] when acquiring the connection or a flush fails,
    /// with [`FetchError::Decode`] when a payload does not parse as the
    /// target type, and with [`FetchError::Fallback`] when the supplier fails
    /// or returns a value of the wrong shape. No partial result is returned.
    #[instrument(skip_all, fields(kind = %request.kind(), keys = request.keys.len()))]
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        request.validate()?;

        let timeout = request.timeout.or_else(|| self.config.flush_timeout());
        let mut session = PipelineSession::open(&self.provider, timeout).await?;
        let outcome = self.run(&mut session, request).await;
        session.release();
        outcome
    }

    async fn run(
        &self,
        session: &mut PipelineSession<'_, P>,
        request: &FetchRequest,
    ) -> Result<FetchResult, FetchError> {
        let gate = ExistenceGate::new(request.fallback.as_deref());
        let GateOutcome {
            effective,
            prefilled,
        } = gate.run(session, &request.keys).await?;

        for (key, value) in &prefilled {
            if !value.conforms_to(request.kind(), request.target) {
                return Err(FetchError::Fallback {
                    key: key.clone(),
                    source: format!(
                        "fallback value does not fit a {} request with {} elements",
                        request.kind(),
                        request.target
                    )
                    .into(),
                });
            }
        }

        let mut strategy = strategy::for_spec(&request.spec, request.target);
        strategy.stage(session, &effective);
        debug!(
            effective = effective.len(),
            staged = session.staged_len(),
            "reads staged"
        );
        session.flush().await?;

        let mut values = prefilled;
        for (key, value) in strategy.collect(session, &self.decoder)? {
            values.entry(key).or_insert(value);
        }
        Ok(FetchResult::assemble(&request.keys, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Reply};
    use crate::decode::{Scalar, TargetType};
    use crate::error::StoreErrorKind;
    use crate::provider::Disposition;
    use crate::session::tests::ScriptedProvider;
    use crate::value::Fetched;

    // `s:1` = "a", `s:2` = "b", `n:1` = "notanint"; everything else is absent.
    fn store(command: &Command) -> Reply {
        let lookup = |key: &str| match key {
            "s:1" => Some("a"),
            "s:2" => Some("b"),
            "n:1" => Some("notanint"),
            _ => None,
        };
        match command {
            Command::Exists { key } => Reply::Integer(i64::from(lookup(key.as_str()).is_some())),
            Command::MGet { keys } => Reply::Array(
                keys.iter()
                    .map(|k| lookup(k.as_str()).map_or(Reply::Nil, |v| Reply::Bulk(v.into())))
                    .collect(),
            ),
            _ => Reply::Array(Vec::new()),
        }
    }

    #[tokio::test]
    async fn validation_happens_before_acquire() {
        let provider = ScriptedProvider::new(store);
        let fetcher = BatchFetcher::new(&provider);
        let request = FetchRequest::hashes(["h"], ["f"]).with_target(TargetType::Bool);

        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
        assert_eq!(provider.acquired.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_substitutes_and_mget_skips_absent() {
        let provider = ScriptedProvider::new(store);
        let fetcher = BatchFetcher::new(&provider);
        let request = FetchRequest::strings(["s:1", "s:2", "s:3"])
            .with_fallback(|_| Ok(Some(Fetched::scalar("X"))));

        let result = fetcher.fetch(&request).await.unwrap();

        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["s:1", "s:2", "s:3"]);
        assert_eq!(result.get("s:3"), Some(&Fetched::scalar("X")));
        let flushes = provider.flushes();
        assert_eq!(flushes.len(), 2);
        assert_eq!(
            flushes[1],
            vec![Command::MGet {
                keys: vec!["s:1".into(), "s:2".into()]
            }]
        );
        assert_eq!(provider.releases(), vec![Disposition::Reuse]);
    }

    #[tokio::test]
    async fn mismatched_fallback_shape_fails() {
        let provider = ScriptedProvider::new(store);
        let fetcher = BatchFetcher::new(&provider);
        let request = FetchRequest::strings(["s:9"])
            .with_target(TargetType::I32)
            .with_fallback(|_| Ok(Some(Fetched::scalar("not an i32"))));

        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::Fallback { ref key, .. } if key == "s:9"));
        assert_eq!(provider.releases().len(), 1);
    }

    #[tokio::test]
    async fn decode_error_releases_connection_for_reuse() {
        let provider = ScriptedProvider::new(store);
        let fetcher = BatchFetcher::new(&provider);
        let request = FetchRequest::strings(["n:1"]).with_target(TargetType::I32);

        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(provider.releases(), vec![Disposition::Reuse]);
    }

    #[tokio::test]
    async fn flush_failure_surfaces_as_store_error() {
        let mut provider = ScriptedProvider::new(store);
        provider.fail_flush = true;
        let fetcher = BatchFetcher::new(&provider);

        let err = fetcher
            .fetch(&FetchRequest::strings(["s:1"]))
            .await
            .unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Connection));
        assert_eq!(provider.releases(), vec![Disposition::Discard]);
    }

    #[tokio::test]
    async fn request_timeout_overrides_config() {
        let mut provider = ScriptedProvider::new(store);
        provider.delay = Some(std::time::Duration::from_millis(50));
        let fetcher = BatchFetcher::new(&provider).with_config(FetchConfig {
            flush_timeout_ms: Some(10),
        });

        let relaxed =
            FetchRequest::strings(["s:1"]).with_timeout(std::time::Duration::from_secs(5));
        let result = fetcher.fetch(&relaxed).await.unwrap();
        assert_eq!(
            result.get("s:1").and_then(Fetched::as_scalar),
            Some(&Scalar::String("a".into()))
        );

        let err = fetcher
            .fetch(&FetchRequest::strings(["s:1"]))
            .await
            .unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Timeout));
    }
}
