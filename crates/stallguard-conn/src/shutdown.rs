//! Closing or aborting every tracked connection during server shutdown.

use std::time::Duration;

use futures_util::future::join_all;
use stallguard_core::ABORT_ALL_CONNECTIONS_TIMEOUT_MS;
use stallguard_metrics::record_shutdown_phase;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info};

use crate::connection_manager::{ConnectionManager, ManagedConnection};
use crate::error::ConnectionAborted;

const ABORT_TIMEOUT: Duration = Duration::from_millis(ABORT_ALL_CONNECTIONS_TIMEOUT_MS);

/// One-shot signal that a connection has fully finished.
#[derive(Debug, Clone, Default)]
pub struct Completion(CancellationToken);

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.0.cancel();
    }

    pub fn is_completed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once [`complete`](Self::complete) is called on any clone.
    /// The future owns its handle and outlives `self`.
    pub fn wait(&self) -> WaitForCancellationFutureOwned {
        self.0.clone().cancelled_owned()
    }
}

/// A connection the server can ask to stop.
pub trait ShutdownConnection: ManagedConnection {
    /// Finish in-flight work, then close.
    fn request_close(&self);

    /// Stop immediately.
    fn abort(&self, reason: ConnectionAborted);

    fn completion(&self) -> Completion;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection closed before the token fired.
    Graceful,
    /// Some connections had to be aborted; all of them stopped.
    Aborted,
    /// Some connections were still running after the abort deadline.
    Incomplete,
}

impl<C: ShutdownConnection + ?Sized> ConnectionManager<C> {
    /// Asks every connection to close and waits for all of them or for
    /// `token`, whichever comes first. Returns `true` only if all closed.
    pub async fn close_all_connections(&self, token: &CancellationToken) -> bool {
        let mut pending = Vec::new();
        self.walk(|connection| {
            connection.request_close();
            pending.push(connection.completion().wait());
        });
        debug!(connections = pending.len(), "closing connections");

        tokio::select! {
            biased;
            _ = join_all(pending) => true,
            _ = token.cancelled() => false,
        }
    }

    /// Aborts every connection and waits at most one second for them to stop.
    pub async fn abort_all_connections(&self) -> bool {
        let mut pending = Vec::new();
        self.walk(|connection| {
            connection.abort(ConnectionAborted::ServerShutdown);
            pending.push(connection.completion().wait());
        });
        debug!(connections = pending.len(), "aborting connections");

        tokio::time::timeout(ABORT_TIMEOUT, join_all(pending))
            .await
            .is_ok()
    }

    /// Graceful close bounded by `token`, escalating to abort on failure.
    pub async fn shutdown_connections(&self, token: &CancellationToken) -> ShutdownOutcome {
        if self.close_all_connections(token).await {
            record_shutdown_phase("close", true);
            info!("all connections closed gracefully");
            return ShutdownOutcome::Graceful;
        }
        self.trace().not_all_connections_closed_gracefully();

        if self.abort_all_connections().await {
            record_shutdown_phase("abort", true);
            return ShutdownOutcome::Aborted;
        }
        self.trace().not_all_connections_aborted();
        ShutdownOutcome::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TracingTrace;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Behaviour of a fake connection when asked to stop.
    #[derive(Clone, Copy)]
    enum Stops {
        OnClose,
        OnAbort,
        Never,
    }

    struct FakeConnection {
        id: String,
        stops: Stops,
        aborted: AtomicBool,
        completion: Completion,
    }

    impl FakeConnection {
        fn new(id: &str, stops: Stops) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                stops,
                aborted: AtomicBool::new(false),
                completion: Completion::new(),
            })
        }
    }

    impl ManagedConnection for FakeConnection {
        fn connection_id(&self) -> &str {
            &self.id
        }
    }

    impl ShutdownConnection for FakeConnection {
        fn request_close(&self) {
            if matches!(self.stops, Stops::OnClose) {
                self.completion.complete();
            }
        }

        fn abort(&self, reason: ConnectionAborted) {
            assert_eq!(reason, ConnectionAborted::ServerShutdown);
            self.aborted.store(true, Ordering::SeqCst);
            if !matches!(self.stops, Stops::Never) {
                self.completion.complete();
            }
        }

        fn completion(&self) -> Completion {
            self.completion.clone()
        }
    }

    fn manager_with(conns: &[Arc<FakeConnection>]) -> ConnectionManager<FakeConnection> {
        let manager = ConnectionManager::new(Arc::new(TracingTrace), None);
        for (id, conn) in conns.iter().enumerate() {
            manager.add_connection(id as u64, conn).unwrap();
        }
        manager
    }

    fn cancel_after(after: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            cancel.cancel();
        });
        token
    }

    #[tokio::test(start_paused = true)]
    async fn close_succeeds_when_every_connection_stops() {
        let conns = [
            FakeConnection::new("a", Stops::OnClose),
            FakeConnection::new("b", Stops::OnClose),
        ];
        let manager = manager_with(&conns);
        let token = cancel_after(Duration::from_millis(50));
        assert!(manager.close_all_connections(&token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_when_one_connection_hangs() {
        let conns = [
            FakeConnection::new("a", Stops::OnClose),
            FakeConnection::new("b", Stops::OnClose),
            FakeConnection::new("c", Stops::Never),
        ];
        let manager = manager_with(&conns);
        let token = cancel_after(Duration::from_millis(50));
        assert!(!manager.close_all_connections(&token).await);
    }

    #[tokio::test]
    async fn close_with_no_connections_is_immediate() {
        let manager = manager_with(&[]);
        let token = CancellationToken::new();
        token.cancel();
        assert!(manager.close_all_connections(&token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_reaches_every_connection() {
        let conns = [
            FakeConnection::new("a", Stops::OnAbort),
            FakeConnection::new("b", Stops::OnClose),
        ];
        let manager = manager_with(&conns);
        assert!(manager.abort_all_connections().await);
        assert!(conns.iter().all(|c| c.aborted.load(Ordering::SeqCst)));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_gives_up_after_one_second() {
        let conns = [FakeConnection::new("stuck", Stops::Never)];
        let manager = manager_with(&conns);

        let started = tokio::time::Instant::now();
        assert!(!manager.abort_all_connections().await);
        assert!(started.elapsed() >= ABORT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_escalates_to_abort() {
        let conns = [
            FakeConnection::new("a", Stops::OnClose),
            FakeConnection::new("b", Stops::OnAbort),
        ];
        let manager = manager_with(&conns);
        let token = cancel_after(Duration::from_millis(50));
        assert_eq!(
            manager.shutdown_connections(&token).await,
            ShutdownOutcome::Aborted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_connections_that_never_stop() {
        let conns = [FakeConnection::new("stuck", Stops::Never)];
        let manager = manager_with(&conns);
        let token = cancel_after(Duration::from_millis(50));
        assert_eq!(
            manager.shutdown_connections(&token).await,
            ShutdownOutcome::Incomplete
        );
    }

    #[tokio::test]
    async fn wait_outlives_the_completion_it_came_from() {
        let completion = Completion::new();
        let waits: Vec<_> = (0..3).map(|_| completion.clone().wait()).collect();
        completion.complete();
        drop(completion);
        join_all(waits).await;
    }

    #[test]
    fn completion_is_shared_between_clones() {
        let completion = Completion::new();
        let clone = completion.clone();
        assert!(!completion.is_completed());
        clone.complete();
        assert!(completion.is_completed());
    }
}
