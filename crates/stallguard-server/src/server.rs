//! Main server loop and connection handling.

use std::net::SocketAddr;
use std::sync::Arc;

use stallguard_config::Config;
use stallguard_conn::{
    ConnectionManager, ConnectionTrace, Debugger, DebuggerSwitch, Heartbeat, HeartbeatHandler,
    HeartbeatManager, MonotonicClock, ShutdownConnection, ShutdownOutcome, TracingTrace,
};
use stallguard_core::{HEARTBEAT_INTERVAL, VERSION};
use stallguard_metrics::{record_connection_accepted, record_connection_closed, record_error};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::TcpConnection;
use crate::error::ServerError;
use crate::state::{Limits, ServerState};
use crate::util::{ConnectionIds, create_listener};

/// Run the server until `shutdown` is cancelled, then close every
/// connection within `shutdown.timeout_secs` and abort the rest.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|_| ServerError::Config("invalid listen address".into()))?;
    let limits = Limits::from_config(&config)?;

    let trace: Arc<dyn ConnectionTrace> = Arc::new(TracingTrace);
    let debugger: Arc<dyn Debugger> = Arc::new(DebuggerSwitch::from_process());
    if debugger.is_attached() {
        warn!("debugger attached; timeouts will not be enforced");
    }

    let connections = Arc::new(ConnectionManager::new(
        trace.clone(),
        config.limits.max_upgraded_connections,
    ));
    let heartbeat_manager = Arc::new(HeartbeatManager::new(connections.clone()));
    let heartbeat = Arc::new(Heartbeat::new(
        vec![heartbeat_manager.clone() as Arc<dyn HeartbeatHandler>],
        Arc::new(MonotonicClock::new()),
        debugger.clone(),
        trace.clone(),
        HEARTBEAT_INTERVAL,
    ));
    let heartbeat_task = heartbeat.start();

    info!(
        keep_alive_secs = limits.keep_alive_timeout.as_secs(),
        request_headers_secs = limits.request_headers_timeout.as_secs(),
        min_request_rate = limits.min_request_rate.map(|r| r.bytes_per_second()),
        min_response_rate = limits.min_response_rate.map(|r| r.bytes_per_second()),
        max_upgraded = config.limits.max_upgraded_connections,
        "connection limits configured"
    );

    let state = Arc::new(ServerState {
        limits,
        connections: connections.clone(),
        heartbeat: heartbeat_manager,
        trace,
        debugger,
    });
    let ids = ConnectionIds::new();

    // Create listener with custom backlog using socket2
    let listener = create_listener(listen, config.server.connection_backlog)?;
    info!(
        address = %listen,
        backlog = config.server.connection_backlog,
        version = VERSION,
        "listening"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        record_error(stallguard_metrics::ERROR_IO);
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                let id = ids.next();
                let connection = Arc::new(TcpConnection::new(id, peer, &state));
                let registration = match connections.register(id, &connection) {
                    Ok(registration) => registration,
                    Err(err) => {
                        let err = ServerError::from(err);
                        record_error(err.error_type());
                        warn!(peer = %peer, error = %err, "connection rejected");
                        continue;
                    }
                };
                debug!(peer = %peer, id, "new connection");

                let state = state.clone();
                tokio::spawn(async move {
                    record_connection_accepted();
                    let start = Instant::now();

                    let result = connection.serve(tcp, &state).await;

                    let duration_secs = start.elapsed().as_secs_f64();
                    record_connection_closed(duration_secs);
                    match result {
                        Ok(()) => debug!(peer = %peer, id, duration_secs, "connection closed"),
                        Err(ref err) => {
                            record_error(err.error_type());
                            debug!(peer = %peer, id, duration_secs, error = %err, "connection closed with error");
                        }
                    }

                    drop(registration);
                    connection.completion().complete();
                });
            }
        }
    }
    drop(listener);

    let active = connections.len();
    if active > 0 {
        info!(active, timeout_secs = config.shutdown.timeout_secs, "closing active connections");
    }
    let deadline = CancellationToken::new();
    let deadline_timer = {
        let deadline = deadline.clone();
        let timeout = config.shutdown.timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        })
    };
    let outcome = connections.shutdown_connections(&deadline).await;
    deadline_timer.abort();

    match outcome {
        ShutdownOutcome::Graceful => {}
        ShutdownOutcome::Aborted => info!("remaining connections aborted"),
        ShutdownOutcome::Incomplete => warn!(
            remaining = connections.len(),
            "shutdown finished with connections still running"
        ),
    }

    heartbeat.stop();
    if let Err(err) = heartbeat_task.await {
        warn!(error = %err, "heartbeat task failed");
    }

    info!("server stopped");
    Ok(())
}

/// Run the server without an external shutdown signal.
pub async fn run(config: Config) -> Result<(), ServerError> {
    run_with_shutdown(config, CancellationToken::new()).await
}
