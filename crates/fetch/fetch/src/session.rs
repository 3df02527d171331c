//! Pipeline sessions.
//!
//! A [`PipelineSession`] owns one connection for the duration of a fetch.
//! Commands are staged without I/O, sent together by [`PipelineSession::flush`],
//! and their replies are then claimed through the [`ResponseHandle`] returned
//! at staging time.
//!
//! The connection goes back to its provider when the session is released,
//! closed, or dropped. A session dropped while a flush is in flight (the
//! calling task was cancelled) or after a failed flush discards its
//! connection instead of returning it for reuse, since unread replies would
//! desynchronise the next user.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::{Command, Reply};
use crate::error::StoreError;
use crate::provider::{ConnectionProvider, Disposition, PipelineConnection};

/// Claim ticket for the reply to one staged command.
///
/// Only valid for the batch it was staged in; a [`PipelineSession::reset`]
/// starts a new batch and invalidates older handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHandle {
    batch: u64,
    index: usize,
}

/// Staging surface used by fetch strategies.
pub trait Pipeline {
    /// Enqueue a command without sending it.
    fn stage(&mut self, command: Command) -> ResponseHandle;

    /// Claim the reply for a handle after the batch has been flushed.
    fn resolve(&mut self, handle: ResponseHandle) -> Result<Reply, StoreError>;
}

/// A single-owner pipeline over a connection borrowed from a provider.
pub struct PipelineSession<'p, P: ConnectionProvider> {
    provider: &'p P,
    connection: Option<P::Connection>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    batch: u64,
    staged: Vec<Command>,
    replies: Vec<Option<Result<Reply, StoreError>>>,
    flushed: bool,
    clean: bool,
    flushes: usize,
}

impl<'p, P: ConnectionProvider> PipelineSession<'p, P> {
    /// Acquire a connection and open a session on it.
    ///
    /// `timeout` is a budget shared by every flush issued on the session:
    /// the deadline is fixed once the connection is acquired, and a flush
    /// still pending when it passes fails with a timeout.
    pub async fn open(provider: &'p P, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let connection = provider.acquire().await?;
        Ok(Self {
            provider,
            connection: Some(connection),
            timeout,
            deadline: timeout.map(|limit| Instant::now() + limit),
            batch: 0,
            staged: Vec::new(),
            replies: Vec::new(),
            flushed: false,
            clean: true,
            flushes: 0,
        })
    }

    /// Enqueue a command. Staging after a flush starts a new batch.
    pub fn stage(&mut self, command: Command) -> ResponseHandle {
        if self.flushed {
            self.reset();
        }
        self.staged.push(command);
        ResponseHandle {
            batch: self.batch,
            index: self.staged.len() - 1,
        }
    }

    /// Number of commands waiting for the next flush.
    pub fn staged_len(&self) -> usize {
        if self.flushed { 0 } else { self.staged.len() }
    }

    /// Number of round-trips performed so far.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Send all staged commands in one round-trip and wait for every reply.
    ///
    /// Flushing an already flushed batch is a no-op. On failure every handle
    /// of the batch resolves to the same error, and the connection is marked
    /// for discard.
    ///
    /// # Errors
    ///
    /// Returns the connection, timeout, or protocol error that aborted the
    /// round-trip.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.flushed {
            return Ok(());
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(StoreError::connection("session is closed"));
        };

        debug!(commands = self.staged.len(), "flushing pipeline");
        // Stays false if this future is dropped before the exchange completes.
        self.clean = false;
        let exchange = connection.exchange(&self.staged);
        let outcome = match (self.deadline, self.timeout) {
            (Some(deadline), Some(limit)) => tokio::time::timeout_at(deadline, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(StoreError::timeout(format!(
                        "pipeline flush missed the {limit:?} call deadline"
                    )))
                }),
            _ => exchange.await,
        };
        self.flushes += 1;
        self.flushed = true;

        let expected = self.staged.len();
        let outcome = outcome.and_then(|replies| {
            if replies.len() == expected {
                Ok(replies)
            } else {
                Err(StoreError::protocol(format!(
                    "expected {expected} replies, received {}",
                    replies.len()
                )))
            }
        });

        match outcome {
            Ok(replies) => {
                self.replies = replies.into_iter().map(|r| Some(Ok(r))).collect();
                self.clean = true;
                Ok(())
            }
            Err(e) => {
                self.replies = vec![Some(Err(e.clone())); expected];
                Err(e)
            }
        }
    }

    /// Claim the reply for `handle`. Each handle resolves once.
    ///
    /// # Errors
    ///
    /// Fails with a protocol error for handles that are not flushed yet,
    /// belong to an earlier batch, or were already claimed; returns the flush
    /// error if the batch failed.
    pub fn resolve(&mut self, handle: ResponseHandle) -> Result<Reply, StoreError> {
        if handle.batch != self.batch {
            return Err(StoreError::protocol(
                "response handle belongs to an earlier batch",
            ));
        }
        if !self.flushed {
            return Err(StoreError::protocol("response handle resolved before flush"));
        }
        self.replies
            .get_mut(handle.index)
            .and_then(Option::take)
            .ok_or_else(|| StoreError::protocol("response handle already resolved"))?
    }

    /// Drop staged commands and unclaimed replies, invalidating all handles.
    pub fn reset(&mut self) {
        self.batch += 1;
        self.staged.clear();
        self.replies.clear();
        self.flushed = false;
    }

    /// Return the connection to the provider, for reuse if it is clean.
    pub fn release(mut self) {
        self.give_back(None);
    }

    /// Return the connection to the provider and have it closed.
    pub fn close(mut self) {
        self.give_back(Some(Disposition::Discard));
    }

    fn give_back(&mut self, forced: Option<Disposition>) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let disposition = forced.unwrap_or(if self.clean {
            Disposition::Reuse
        } else {
            Disposition::Discard
        });
        if disposition == Disposition::Discard {
            warn!(flushes = self.flushes, "discarding pipeline connection");
        }
        self.provider.release(connection, disposition);
    }
}

impl<P: ConnectionProvider> Pipeline for PipelineSession<'_, P> {
    fn stage(&mut self, command: Command) -> ResponseHandle {
        PipelineSession::stage(self, command)
    }

    fn resolve(&mut self, handle: ResponseHandle) -> Result<Reply, StoreError> {
        PipelineSession::resolve(self, handle)
    }
}

impl<P: ConnectionProvider> Drop for PipelineSession<'_, P> {
    fn drop(&mut self) {
        self.give_back(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreErrorKind;

    /// Replies to every command with a function of the command.
    pub(crate) struct ScriptedProvider {
        pub respond: fn(&Command) -> Reply,
        pub fail_flush: bool,
        pub delay: Option<Duration>,
        pub acquired: AtomicUsize,
        pub released: Mutex<Vec<Disposition>>,
        pub log: Mutex<Vec<Vec<Command>>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(respond: fn(&Command) -> Reply) -> Self {
            Self {
                respond,
                fail_flush: false,
                delay: None,
                acquired: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
                log: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn flushes(&self) -> Vec<Vec<Command>> {
            self.log.lock().unwrap().clone()
        }

        pub(crate) fn releases(&self) -> Vec<Disposition> {
            self.released.lock().unwrap().clone()
        }
    }

    pub(crate) struct ScriptedConnection<'a> {
        provider: &'a ScriptedProvider,
    }

    #[async_trait]
    impl PipelineConnection for ScriptedConnection<'_> {
        async fn exchange(&mut self, commands: &[Command]) -> Result<Vec<Reply>, StoreError> {
            self.provider.log.lock().unwrap().push(commands.to_vec());
            if let Some(delay) = self.provider.delay {
                tokio::time::sleep(delay).await;
            }
            if self.provider.fail_flush {
                return Err(StoreError::connection("connection reset by peer"));
            }
            Ok(commands.iter().map(self.provider.respond).collect())
        }
    }

    // Implemented on the reference so connections can borrow the provider.
    #[async_trait]
    impl<'a> ConnectionProvider for &'a ScriptedProvider {
        type Connection = ScriptedConnection<'a>;

        async fn acquire(&self) -> Result<Self::Connection, StoreError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedConnection { provider: *self })
        }

        fn release(&self, _connection: Self::Connection, disposition: Disposition) {
            self.released.lock().unwrap().push(disposition);
        }
    }

    fn echo(command: &Command) -> Reply {
        Reply::Bulk(command.to_string())
    }

    fn exists(key: &str) -> Command {
        Command::Exists { key: key.into() }
    }

    #[tokio::test]
    async fn replies_match_handles_in_issue_order() {
        let provider = ScriptedProvider::new(echo);
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();

        let a = session.stage(exists("a"));
        let b = session.stage(exists("b"));
        session.flush().await.unwrap();

        assert_eq!(session.resolve(b).unwrap(), Reply::Bulk("EXISTS b".into()));
        assert_eq!(session.resolve(a).unwrap(), Reply::Bulk("EXISTS a".into()));
        assert_eq!(provider.flushes().len(), 1);
    }

    #[tokio::test]
    async fn resolve_before_flush_is_refused() {
        let provider = ScriptedProvider::new(echo);
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();

        let handle = session.stage(exists("a"));
        let err = session.resolve(handle).unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Protocol);

        session.flush().await.unwrap();
        assert!(session.resolve(handle).is_ok());
        assert!(session.resolve(handle).is_err(), "handles resolve once");
    }

    #[tokio::test]
    async fn reset_invalidates_previous_handles() {
        let provider = ScriptedProvider::new(echo);
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();

        let stale = session.stage(exists("a"));
        session.flush().await.unwrap();
        session.reset();
        assert_eq!(session.staged_len(), 0);

        let fresh = session.stage(exists("b"));
        session.flush().await.unwrap();
        assert!(session.resolve(stale).is_err());
        assert_eq!(session.resolve(fresh).unwrap(), Reply::Bulk("EXISTS b".into()));
        assert_eq!(session.flush_count(), 2);
    }

    #[tokio::test]
    async fn failed_flush_errors_every_handle_and_discards() {
        let mut provider = ScriptedProvider::new(echo);
        provider.fail_flush = true;
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();

        let a = session.stage(exists("a"));
        let b = session.stage(exists("b"));
        let err = session.flush().await.unwrap_err();

        assert_eq!(session.resolve(a).unwrap_err(), err);
        assert_eq!(session.resolve(b).unwrap_err(), err);
        session.release();
        assert_eq!(provider.releases(), vec![Disposition::Discard]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timeout_is_reported_as_timeout() {
        let mut provider = ScriptedProvider::new(echo);
        provider.delay = Some(Duration::from_secs(5));
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, Some(Duration::from_millis(100)))
            .await
            .unwrap();

        session.stage(exists("a"));
        let err = session.flush().await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Timeout);
        drop(session);
        assert_eq!(provider.releases(), vec![Disposition::Discard]);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_share_one_deadline() {
        let mut provider = ScriptedProvider::new(echo);
        provider.delay = Some(Duration::from_millis(60));
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, Some(Duration::from_millis(100)))
            .await
            .unwrap();

        session.stage(exists("a"));
        session.flush().await.unwrap();
        session.stage(exists("b"));
        let err = session.flush().await.unwrap_err();

        assert_eq!(err.kind, StoreErrorKind::Timeout);
        assert_eq!(session.flush_count(), 2);
        session.release();
        assert_eq!(provider.releases(), vec![Disposition::Discard]);
    }

    #[tokio::test]
    async fn clean_session_is_released_for_reuse_once() {
        let provider = ScriptedProvider::new(echo);
        let scripted = &provider;
        let mut session = PipelineSession::open(&scripted, None).await.unwrap();
        session.stage(exists("a"));
        session.flush().await.unwrap();
        session.release();

        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(provider.releases(), vec![Disposition::Reuse]);
    }

    #[tokio::test]
    async fn close_always_discards() {
        let provider = ScriptedProvider::new(echo);
        let scripted = &provider;
        let session = PipelineSession::open(&scripted, None).await.unwrap();
        session.close();
        assert_eq!(provider.releases(), vec![Disposition::Discard]);
    }
}
