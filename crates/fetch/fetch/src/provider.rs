use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{Command, Reply};
use crate::error::StoreError;

/// What a provider should do with a connection handed back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The connection is in a clean state and may be reused.
    Reuse,
    /// The connection may have unread replies in flight and must be closed.
    Discard,
}

/// A connection able to send a batch of commands in one round-trip.
#[async_trait]
pub trait PipelineConnection: Send {
    /// Write every command in one burst and return the replies in issue order.
    ///
    /// Per-command failures are returned as [`Reply::Error`]; an `Err` means
    /// the round-trip as a whole failed.
    async fn exchange(&mut self, commands: &[Command]) -> Result<Vec<Reply>, StoreError>;
}

/// Source of pipeline-capable connections.
///
/// Implementations must be safe for concurrent `acquire`/`release` calls.
/// Each connection is handed out to one caller at a time and released
/// exactly once, which ownership of [`Self::Connection`] enforces.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: PipelineConnection;

    /// Obtain a connection. Failure is fatal for the calling fetch.
    async fn acquire(&self) -> Result<Self::Connection, StoreError>;

    /// Return a connection. Must not block or fail.
    fn release(&self, connection: Self::Connection, disposition: Disposition);
}

#[async_trait]
impl<P: ConnectionProvider> ConnectionProvider for Arc<P> {
    type Connection = P::Connection;

    async fn acquire(&self) -> Result<Self::Connection, StoreError> {
        (**self).acquire().await
    }

    fn release(&self, connection: Self::Connection, disposition: Disposition) {
        (**self).release(connection, disposition);
    }
}
