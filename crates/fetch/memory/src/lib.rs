//! In-memory backend for `pipefetch`.
//!
//! [`MemoryStore`] answers the read commands with Redis semantics and
//! [`MemoryConnectionProvider`] hands out connections to it while counting
//! acquisitions, recording every pipelined batch, and injecting faults on
//! request. Used to exercise fetch behaviour without a server.

mod provider;
mod store;

pub use provider::{MemoryConnection, MemoryConnectionProvider, ProviderStats};
pub use store::MemoryStore;
