use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use pipefetch::{
    Command, ConnectionProvider, Disposition, PipelineConnection, Reply, StoreError,
};

use crate::store::MemoryStore;

/// Counters kept by a [`MemoryConnectionProvider`].
#[derive(Debug, Default)]
pub struct ProviderStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    batches: Mutex<Vec<Vec<Command>>>,
}

impl ProviderStats {
    /// Successful `acquire` calls.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Connections handed back, whatever the disposition.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Connections handed back with [`Disposition::Discard`].
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Connections currently checked out.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    /// Every round-trip seen so far, in order, as the list of commands sent.
    pub fn flushes(&self) -> Vec<Vec<Command>> {
        lock(&self.batches).clone()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.batches).len()
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_acquire: AtomicBool,
    /// 1-based round-trip number that fails; 0 disables.
    fail_flush_at: AtomicUsize,
    latency_ms: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    store: Arc<MemoryStore>,
    stats: ProviderStats,
    faults: Faults,
}

/// Connection provider over a [`MemoryStore`] that counts acquisitions,
/// records every pipelined batch, and can inject faults and latency.
///
/// Clones share the same store, counters and fault settings.
#[derive(Debug, Clone)]
pub struct MemoryConnectionProvider {
    shared: Arc<Shared>,
}

impl MemoryConnectionProvider {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                stats: ProviderStats::default(),
                faults: Faults::default(),
            }),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.shared.store
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.shared.stats
    }

    /// Make every following `acquire` fail with a connection error.
    pub fn set_acquire_failure(&self, fail: bool) {
        self.shared.faults.fail_acquire.store(fail, Ordering::SeqCst);
    }

    /// Fail the `n`th round-trip (counting from 1 across all connections)
    /// with a connection error. `None` clears the fault.
    pub fn fail_flush_at(&self, n: Option<usize>) {
        self.shared
            .faults
            .fail_flush_at
            .store(n.unwrap_or(0), Ordering::SeqCst);
    }

    /// Delay every round-trip by `latency` before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.shared.faults.latency_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionProvider for MemoryConnectionProvider {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, StoreError> {
        if self.shared.faults.fail_acquire.load(Ordering::SeqCst) {
            return Err(StoreError::connection("connection refused"));
        }
        let id = self.shared.stats.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(connection = id, "memory connection acquired");
        Ok(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn release(&self, connection: MemoryConnection, disposition: Disposition) {
        let stats = &self.shared.stats;
        stats.released.fetch_add(1, Ordering::SeqCst);
        if disposition == Disposition::Discard {
            stats.discarded.fetch_add(1, Ordering::SeqCst);
            debug!(connection = connection.id, "memory connection discarded");
        }
    }
}

/// A checked-out connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    shared: Arc<Shared>,
}

#[async_trait]
impl PipelineConnection for MemoryConnection {
    async fn exchange(&mut self, commands: &[Command]) -> Result<Vec<Reply>, StoreError> {
        let round_trip = {
            let mut batches = lock(&self.shared.stats.batches);
            batches.push(commands.to_vec());
            batches.len()
        };

        let latency = self.shared.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.shared.faults.fail_flush_at.load(Ordering::SeqCst) == round_trip {
            return Err(StoreError::connection("connection reset by peer"));
        }

        Ok(commands
            .iter()
            .map(|command| self.shared.store.execute(command))
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
