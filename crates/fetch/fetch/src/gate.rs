use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::command::{Command, Reply};
use crate::error::{BoxError, FetchError};
use crate::provider::ConnectionProvider;
use crate::session::PipelineSession;
use crate::value::Fetched;

/// Keys left to read and the values substituted for absent keys.
#[derive(Debug, Default)]
pub struct GateOutcome {
    pub effective: Vec<String>,
    pub prefilled: HashMap<String, Fetched>,
}

/// Partitions keys into present and absent with pipelined `EXISTS` probes
/// and fills absent keys from a fallback supplier.
///
/// Without a fallback the gate is transparent: no probes are sent and every
/// key is read.
pub struct ExistenceGate<'f> {
    fallback: Option<&'f (dyn Fn(&str) -> Result<Option<Fetched>, BoxError> + Send + Sync)>,
}

impl<'f> ExistenceGate<'f> {
    pub fn new(
        fallback: Option<&'f (dyn Fn(&str) -> Result<Option<Fetched>, BoxError> + Send + Sync)>,
    ) -> Self {
        Self { fallback }
    }

    /// Probe `keys` on `session`, leaving it reset for the next batch.
    ///
    /// A key is absent when its probe replies `0`, nil, or an error. Absent
    /// keys are removed from the effective list whatever the fallback
    /// returns; the fallback runs once per distinct absent key.
    ///
    /// # Errors
    ///
    /// Fails if the probe flush fails or the fallback returns an error.
    pub async fn run<P: ConnectionProvider>(
        &self,
        session: &mut PipelineSession<'_, P>,
        keys: &[String],
    ) -> Result<GateOutcome, FetchError> {
        let Some(fallback) = self.fallback else {
            return Ok(GateOutcome {
                effective: keys.to_vec(),
                prefilled: HashMap::new(),
            });
        };
        if keys.is_empty() {
            return Ok(GateOutcome::default());
        }

        let probes: Vec<_> = keys
            .iter()
            .map(|key| session.stage(Command::Exists { key: key.clone() }))
            .collect();
        session.flush().await?;

        let mut absent = HashSet::new();
        let mut outcome = GateOutcome::default();
        for (key, probe) in keys.iter().zip(probes) {
            let present = matches!(session.resolve(probe), Ok(Reply::Integer(n)) if n > 0);
            if present {
                outcome.effective.push(key.clone());
                continue;
            }
            if !absent.insert(key.as_str()) {
                continue;
            }
            let substitute = fallback(key).map_err(|source| FetchError::Fallback {
                key: key.clone(),
                source,
            })?;
            if let Some(value) = substitute {
                outcome.prefilled.insert(key.clone(), value);
            }
        }
        session.reset();

        debug!(
            probed = keys.len(),
            absent = absent.len(),
            prefilled = outcome.prefilled.len(),
            "existence gate finished"
        );
        Ok(outcome)
    }
}
