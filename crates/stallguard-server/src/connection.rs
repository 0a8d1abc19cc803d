//! One accepted connection speaking the line echo protocol.
//!
//! Every line received is echoed back. `QUIT` closes the connection and
//! `UPGRADE` switches it to a raw, untimed byte echo if the upgrade quota
//! allows. Idle connections are closed by the keep-alive timeout; a line
//! that arrives too slowly aborts the connection. A connection asked to close
//! mid-line gets a bounded drain period to finish it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use stallguard_conn::{
    Completion, ConnectionAborted, ConnectionTrace, ManagedConnection, MinDataRate,
    ResourceLease, ShutdownConnection, SystemClock, Tickable, TimeoutControl, TimeoutHandler,
    TimeoutReason, Timestamp,
};
use stallguard_metrics::{record_upgrade, record_upgrade_closed};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ServerError;
use crate::state::{Limits, ServerState};
use crate::util::trim_line_ending;

/// Longest line buffered before the connection is dropped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Abort signal shared by a connection and its timeout handler.
/// The first reason recorded wins.
#[derive(Default)]
struct AbortSignal {
    token: CancellationToken,
    reason: Mutex<Option<ConnectionAborted>>,
}

impl AbortSignal {
    fn abort(&self, reason: ConnectionAborted) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    fn error(&self) -> ServerError {
        let reason = (*self.reason.lock()).unwrap_or(ConnectionAborted::ServerShutdown);
        ServerError::Aborted(reason)
    }
}

/// Turns detected timeouts into a close or an abort.
struct TimeoutAbort {
    connection_id: String,
    close: CancellationToken,
    abort: Arc<AbortSignal>,
    trace: Arc<dyn ConnectionTrace>,
    min_request_rate: Option<MinDataRate>,
}

impl TimeoutHandler for TimeoutAbort {
    fn on_timeout(&self, reason: TimeoutReason) {
        self.trace.connection_timed_out(&self.connection_id, reason);
        match reason {
            // Nothing is in flight; close as if asked to.
            TimeoutReason::KeepAlive => {
                self.close.cancel();
                return;
            }
            TimeoutReason::ReadDataRate => {
                let rate = self
                    .min_request_rate
                    .map_or(0.0, |rate| rate.bytes_per_second());
                self.trace
                    .request_body_minimum_data_rate_not_satisfied(&self.connection_id, rate);
            }
            TimeoutReason::WriteDataRate => {
                self.trace
                    .response_minimum_data_rate_not_satisfied(&self.connection_id);
            }
            _ => {}
        }
        self.abort.abort(ConnectionAborted::TimedOut(reason));
    }
}

/// Holds an upgrade slot for as long as the raw stream runs.
struct UpgradedStream {
    _lease: ResourceLease,
}

impl UpgradedStream {
    fn new(lease: ResourceLease) -> Self {
        record_upgrade("granted");
        Self { _lease: lease }
    }
}

impl Drop for UpgradedStream {
    fn drop(&mut self) {
        record_upgrade_closed();
    }
}

enum Reply {
    Continue,
    Quit,
    Upgrade(UpgradedStream),
}

pub struct TcpConnection {
    id: u64,
    connection_id: String,
    peer: SocketAddr,
    timeouts: TimeoutControl,
    close: CancellationToken,
    abort: Arc<AbortSignal>,
    completion: Completion,
}

impl TcpConnection {
    pub fn new(id: u64, peer: SocketAddr, state: &ServerState) -> Self {
        let connection_id = format!("conn-{id}");
        let close = CancellationToken::new();
        let abort = Arc::new(AbortSignal::default());
        let handler = Arc::new(TimeoutAbort {
            connection_id: connection_id.clone(),
            close: close.clone(),
            abort: abort.clone(),
            trace: state.trace.clone(),
            min_request_rate: state.limits.min_request_rate,
        });
        let timeouts = TimeoutControl::new(handler, state.debugger.clone());
        timeouts.initialize(state.heartbeat.now());

        Self {
            id,
            connection_id,
            peer,
            timeouts,
            close,
            abort,
            completion: Completion::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn timeouts(&self) -> &TimeoutControl {
        &self.timeouts
    }

    /// Runs the protocol until the peer leaves, the connection is closed or
    /// it is aborted.
    pub async fn serve<S>(&self, stream: S, state: &ServerState) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let limits = &state.limits;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut pending = BytesMut::with_capacity(limits.read_buffer_size);
        let mut buf = vec![0u8; limits.read_buffer_size];
        self.arm_keep_alive(limits);
        let mut draining = false;

        loop {
            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line = pending.split_to(end + 1);
                self.pause_request_timing(limits);
                match self.respond(&line, &mut writer, state).await? {
                    Reply::Continue => {}
                    Reply::Quit => return Ok(()),
                    Reply::Upgrade(upgraded) => {
                        return self
                            .serve_upgraded(reader, writer, pending, upgraded, limits)
                            .await;
                    }
                }
                if self.close.is_cancelled() {
                    debug!(id = %self.connection_id, "closing after completed line");
                    return Ok(());
                }
                if pending.is_empty() {
                    self.arm_keep_alive(limits);
                } else {
                    self.resume_request_timing(limits);
                }
            }
            if pending.len() > MAX_LINE_BYTES {
                return Err(ServerError::LineTooLong(MAX_LINE_BYTES));
            }

            let n = tokio::select! {
                biased;
                _ = self.abort.token.cancelled() => return Err(self.abort.error()),
                _ = self.close.cancelled(), if pending.is_empty() => return Ok(()),
                _ = self.close.cancelled(), if !draining => {
                    draining = true;
                    debug!(id = %self.connection_id, "draining partial line before close");
                    self.timeouts.reset_timeout(
                        limits.request_drain_timeout,
                        TimeoutReason::RequestBodyDrain,
                    );
                    continue;
                }
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }
            if pending.is_empty() {
                self.begin_request_timing(limits);
            }
            self.timeouts.bytes_read(n as u64);
            pending.extend_from_slice(&buf[..n]);
        }
    }

    async fn respond<W>(
        &self,
        line: &[u8],
        writer: &mut W,
        state: &ServerState,
    ) -> Result<Reply, ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let limits = &state.limits;
        match trim_line_ending(line) {
            b"UPGRADE" => match state.connections.upgraded_connection_count().try_lease() {
                Some(lease) => {
                    let upgraded = UpgradedStream::new(lease);
                    self.write_timed(writer, b"+OK\r\n", limits).await?;
                    debug!(id = %self.connection_id, "upgraded");
                    Ok(Reply::Upgrade(upgraded))
                }
                None => {
                    record_upgrade("rejected");
                    debug!(id = %self.connection_id, "upgrade rejected");
                    self.write_timed(writer, b"-ERR upgrade limit reached\r\n", limits)
                        .await?;
                    Ok(Reply::Continue)
                }
            },
            b"QUIT" => {
                self.write_timed(writer, b"+BYE\r\n", limits).await?;
                Ok(Reply::Quit)
            }
            _ => {
                self.write_timed(writer, line, limits).await?;
                Ok(Reply::Continue)
            }
        }
    }

    /// Raw echo without request timing; only a close or abort ends it early.
    async fn serve_upgraded<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        pending: BytesMut,
        _upgraded: UpgradedStream,
        limits: &Limits,
    ) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.timeouts.cancel_timeout();
        self.timeouts.stop_timing_reads();

        if !pending.is_empty() {
            self.write_or_abort(&mut writer, &pending).await?;
        }

        let mut buf = vec![0u8; limits.read_buffer_size];
        loop {
            let n = tokio::select! {
                biased;
                _ = self.abort.token.cancelled() => return Err(self.abort.error()),
                _ = self.close.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }
            self.write_or_abort(&mut writer, &buf[..n]).await?;
        }
    }

    async fn write_timed<W>(
        &self,
        writer: &mut W,
        data: &[u8],
        limits: &Limits,
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(rate) = &limits.min_response_rate else {
            return self.write_or_abort(writer, data).await;
        };
        self.timeouts.start_timing_write(rate, data.len() as u64);
        let result = self.write_or_abort(writer, data).await;
        self.timeouts.stop_timing_write();
        result
    }

    async fn write_or_abort<W>(&self, writer: &mut W, data: &[u8]) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            _ = self.abort.token.cancelled() => Err(self.abort.error()),
            written = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => written.map_err(ServerError::from),
        }
    }

    fn arm_keep_alive(&self, limits: &Limits) {
        self.timeouts.stop_timing_reads();
        self.timeouts
            .reset_timeout(limits.keep_alive_timeout, TimeoutReason::KeepAlive);
    }

    /// The first bytes of a line arrived.
    fn begin_request_timing(&self, limits: &Limits) {
        match limits.min_request_rate {
            Some(rate) => {
                self.timeouts.cancel_timeout();
                self.timeouts.start_timing_reads(rate);
            }
            None => self
                .timeouts
                .reset_timeout(limits.request_headers_timeout, TimeoutReason::RequestHeaders),
        }
    }

    /// A full line arrived; the reply is not the peer's fault.
    fn pause_request_timing(&self, limits: &Limits) {
        match limits.min_request_rate {
            Some(_) => self.timeouts.pause_timing_reads(),
            None => self.timeouts.cancel_timeout(),
        }
    }

    /// More of the next line is already buffered.
    fn resume_request_timing(&self, limits: &Limits) {
        match limits.min_request_rate {
            Some(_) => self.timeouts.resume_timing_reads(),
            None => self
                .timeouts
                .reset_timeout(limits.request_headers_timeout, TimeoutReason::RequestHeaders),
        }
    }
}

impl ManagedConnection for TcpConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl Tickable for TcpConnection {
    fn tick(&self, now: Timestamp) {
        self.timeouts.tick(now);
    }
}

impl ShutdownConnection for TcpConnection {
    fn request_close(&self) {
        self.close.cancel();
    }

    fn abort(&self, reason: ConnectionAborted) {
        self.abort.abort(reason);
    }

    fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stallguard_conn::{ConnectionManager, HeartbeatManager, NoDebugger, TracingTrace};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    fn limits() -> Limits {
        Limits {
            keep_alive_timeout: Duration::from_secs(5),
            request_headers_timeout: Duration::from_secs(2),
            request_drain_timeout: Duration::from_secs(5),
            min_request_rate: None,
            min_response_rate: None,
            read_buffer_size: 64,
        }
    }

    fn state(limits: Limits, max_upgraded: Option<u64>) -> Arc<ServerState> {
        let trace: Arc<dyn ConnectionTrace> = Arc::new(TracingTrace);
        let connections = Arc::new(ConnectionManager::new(trace.clone(), max_upgraded));
        Arc::new(ServerState {
            limits,
            heartbeat: Arc::new(HeartbeatManager::new(connections.clone())),
            connections,
            trace,
            debugger: Arc::new(NoDebugger),
        })
    }

    fn spawn(
        state: &Arc<ServerState>,
    ) -> (
        Arc<TcpConnection>,
        BufReader<DuplexStream>,
        JoinHandle<Result<(), ServerError>>,
    ) {
        let (client, server) = tokio::io::duplex(1024);
        let peer = "127.0.0.1:4000".parse().unwrap();
        let connection = Arc::new(TcpConnection::new(1, peer, state));
        let task = {
            let connection = connection.clone();
            let state = state.clone();
            tokio::spawn(async move { connection.serve(server, &state).await })
        };
        (connection, BufReader::new(client), task)
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn read_line(client: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        line
    }

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn echoes_lines_until_quit() {
        let state = state(limits(), None);
        let (_connection, mut client, task) = spawn(&state);

        client.get_mut().write_all(b"hello\r\nworld\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "hello\r\n");
        assert_eq!(read_line(&mut client).await, "world\n");

        client.get_mut().write_all(b"QUIT\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "+BYE\r\n");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn keep_alive_timeout_closes_idle_connection() {
        let state = state(limits(), None);
        let (connection, _client, task) = spawn(&state);
        settle().await;

        connection.tick(at(6));
        settle().await;
        assert!(!task.is_finished());

        connection.tick(at(7));
        task.await.unwrap().unwrap();
        assert_eq!(connection.timeouts().timer_reason(), TimeoutReason::KeepAlive);
    }

    #[tokio::test]
    async fn partial_line_times_out_as_request_headers() {
        let state = state(limits(), None);
        let (connection, mut client, task) = spawn(&state);
        client.get_mut().write_all(b"slo").await.unwrap();
        settle().await;

        connection.tick(at(4));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Aborted(ConnectionAborted::TimedOut(TimeoutReason::RequestHeaders))
        ));
    }

    #[tokio::test]
    async fn slow_line_violates_min_request_rate() {
        let mut limits = limits();
        limits.min_request_rate = Some(MinDataRate::new(100.0, Duration::from_secs(1)).unwrap());
        let state = state(limits, None);
        let (connection, mut client, task) = spawn(&state);
        client.get_mut().write_all(b"s").await.unwrap();
        settle().await;

        connection.tick(at(1));
        connection.tick(at(2));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Aborted(ConnectionAborted::TimedOut(TimeoutReason::ReadDataRate))
        ));
    }

    #[tokio::test]
    async fn graceful_close_finishes_current_line() {
        let state = state(limits(), None);
        let (connection, mut client, task) = spawn(&state);
        client.get_mut().write_all(b"hel").await.unwrap();
        settle().await;

        connection.request_close();
        client.get_mut().write_all(b"lo\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "hello\n");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closing_mid_line_is_bounded_by_drain_timeout() {
        let state = state(limits(), None);
        let (connection, mut client, task) = spawn(&state);
        client.get_mut().write_all(b"hel").await.unwrap();
        settle().await;

        connection.request_close();
        settle().await;

        // The drain deadline replaced the shorter request line deadline.
        connection.tick(at(4));
        settle().await;
        assert!(!task.is_finished());

        connection.tick(at(7));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Aborted(ConnectionAborted::TimedOut(TimeoutReason::RequestBodyDrain))
        ));
    }

    #[tokio::test]
    async fn abort_ends_connection_with_reason() {
        let state = state(limits(), None);
        let (connection, _client, task) = spawn(&state);
        settle().await;

        connection.abort(ConnectionAborted::ServerShutdown);
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Aborted(ConnectionAborted::ServerShutdown)
        ));
    }

    #[tokio::test]
    async fn upgrade_respects_quota() {
        let state = state(limits(), Some(1));
        let (_first, mut first_client, first_task) = spawn(&state);
        let (_second, mut second_client, _second_task) = spawn(&state);

        first_client.get_mut().write_all(b"UPGRADE\n").await.unwrap();
        assert_eq!(read_line(&mut first_client).await, "+OK\r\n");

        second_client.get_mut().write_all(b"UPGRADE\n").await.unwrap();
        assert_eq!(
            read_line(&mut second_client).await,
            "-ERR upgrade limit reached\r\n"
        );

        // Raw echo: no line framing needed.
        first_client.get_mut().write_all(b"raw").await.unwrap();
        let mut raw = [0u8; 3];
        first_client.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"raw");

        drop(first_client);
        first_task.await.unwrap().unwrap();
        assert!(state.connections.upgraded_connection_count().try_lock_one());
    }

    #[tokio::test]
    async fn upgraded_stream_ignores_timeouts() {
        let state = state(limits(), None);
        let (connection, mut client, task) = spawn(&state);
        client.get_mut().write_all(b"UPGRADE\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "+OK\r\n");
        settle().await;

        connection.tick(at(600));
        settle().await;
        assert!(!task.is_finished());

        connection.request_close();
        task.await.unwrap().unwrap();
    }
}
