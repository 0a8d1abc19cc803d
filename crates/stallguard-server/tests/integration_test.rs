//! Integration tests for stallguard-server.
//!
//! These tests run the real accept loop on a loopback port and verify:
//! - line echo
//! - keep-alive timeout
//! - upgrade quota
//! - graceful shutdown
#![allow(clippy::tests_outside_test_module)]

use std::net::SocketAddr;
use std::time::Duration;

use stallguard_config::{
    Config, LimitsConfig, LoggingConfig, MetricsConfig, ServerConfig, ShutdownConfig,
};
use stallguard_server::{CancellationToken, ServerError, run_with_shutdown};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const TEST_DEADLINE: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(limits: LimitsConfig) -> Self {
        // Find available port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config {
            server: ServerConfig {
                listen: addr.to_string(),
                connection_backlog: 64,
                read_buffer_size: 1024,
            },
            limits,
            shutdown: ShutdownConfig { timeout_secs: 2 },
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        };

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_with_shutdown(config, shutdown.clone()));

        // Wait for the listener to come up
        for _ in 0..100 {
            if TcpStream::connect(addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn connect(&self) -> BufReader<TcpStream> {
        BufReader::new(TcpStream::connect(self.addr).await.unwrap())
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(TEST_DEADLINE, self.handle)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }
}

fn limits() -> LimitsConfig {
    LimitsConfig {
        min_request_body_data_rate: None,
        min_response_data_rate: None,
        ..LimitsConfig::default()
    }
}

async fn read_line(client: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(TEST_DEADLINE, client.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    line
}

async fn expect_eof(client: &mut BufReader<TcpStream>) {
    let mut rest = Vec::new();
    let n = tokio::time::timeout(TEST_DEADLINE, client.read_to_end(&mut rest))
        .await
        .expect("connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected trailing data: {rest:?}");
}

#[tokio::test]
async fn echoes_lines() {
    let server = TestServer::start(limits()).await;
    let mut client = server.connect().await;

    client.get_mut().write_all(b"ping\r\n").await.unwrap();
    assert_eq!(read_line(&mut client).await, "ping\r\n");

    client.get_mut().write_all(b"QUIT\n").await.unwrap();
    assert_eq!(read_line(&mut client).await, "+BYE\r\n");
    expect_eof(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn idle_connection_hits_keep_alive_timeout() {
    let server = TestServer::start(LimitsConfig {
        keep_alive_timeout_secs: 1,
        ..limits()
    })
    .await;
    let mut client = server.connect().await;

    client.get_mut().write_all(b"hi\n").await.unwrap();
    assert_eq!(read_line(&mut client).await, "hi\n");
    expect_eof(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn stalled_line_is_aborted() {
    let server = TestServer::start(LimitsConfig {
        request_headers_timeout_secs: 1,
        ..limits()
    })
    .await;
    let mut client = server.connect().await;

    client.get_mut().write_all(b"never finished").await.unwrap();
    expect_eof(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn upgrade_limit_is_enforced() {
    let server = TestServer::start(LimitsConfig {
        max_upgraded_connections: Some(1),
        ..limits()
    })
    .await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;

    first.get_mut().write_all(b"UPGRADE\n").await.unwrap();
    assert_eq!(read_line(&mut first).await, "+OK\r\n");

    second.get_mut().write_all(b"UPGRADE\n").await.unwrap();
    assert_eq!(read_line(&mut second).await, "-ERR upgrade limit reached\r\n");

    drop(first);
    // The slot frees once the first connection's task notices the close.
    let mut granted = false;
    for _ in 0..50 {
        second.get_mut().write_all(b"UPGRADE\n").await.unwrap();
        if read_line(&mut second).await == "+OK\r\n" {
            granted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(granted);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_lets_in_flight_line_finish() {
    let server = TestServer::start(limits()).await;
    let mut idle = server.connect().await;
    let mut busy = server.connect().await;

    busy.get_mut().write_all(b"half").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    expect_eof(&mut idle).await;

    busy.get_mut().write_all(b" done\n").await.unwrap();
    assert_eq!(read_line(&mut busy).await, "half done\n");
    expect_eof(&mut busy).await;

    server.stop().await;
}
