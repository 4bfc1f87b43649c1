#![allow(clippy::unwrap_used, clippy::expect_used)]
//! The TCP listener end to end over loopback.

mod common;

use std::time::Duration;

use common::*;
use host_connect::config::HostConnectConfig;
use host_connect::transport::serve_listener;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

async fn start(
    harness: &Harness,
) -> (
    std::net::SocketAddr,
    mpsc::Sender<()>,
    tokio::task::JoinHandle<host_connect::Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server = tokio::spawn(serve_listener(listener, harness.ctx.clone(), shutdown_rx));
    (addr, shutdown_tx, server)
}

#[tokio::test]
async fn test_shutdown_disconnects_registered_hosts() {
    let harness = Harness::with_config(HostConnectConfig::default_with_overrides(|c| {
        c.server.shutdown_timeout = Duration::from_secs(2);
    }));
    let (addr, shutdown_tx, server) = start(&harness).await;

    let mut host = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut host, &signing_key(40), "Agent1").await;
    let registry = harness.ctx.registry.clone();
    wait_until(|| registry.len() == 1).await;

    shutdown_tx.send(()).await.unwrap();
    server.await.unwrap().unwrap();

    assert!(read_until_closed(&mut host).await.is_empty());
    assert!(registry.is_empty());
    assert_eq!(harness.ctx.metrics.snapshot().connections_active, 0);
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_hosts() {
    let harness = Harness::with_config(HostConnectConfig::default_with_overrides(|c| {
        c.server.max_connections = 1;
    }));
    let (addr, _shutdown_tx, _server) = start(&harness).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    read_challenge(&mut first).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut buf))
        .await
        .expect("refused socket should close")
        .unwrap();
    assert!(buf.is_empty());
    assert_eq!(harness.ctx.metrics.snapshot().connections_refused, 1);
}

#[tokio::test]
async fn test_handshake_finishing_during_shutdown_is_closed() {
    let harness = Harness::with_config(HostConnectConfig::default_with_overrides(|c| {
        c.server.shutdown_timeout = Duration::from_secs(5);
    }));
    let (addr, shutdown_tx, server) = start(&harness).await;
    let registry = harness.ctx.registry.clone();

    let mut host = TcpStream::connect(addr).await.unwrap();
    let challenge = read_challenge(&mut host).await;

    shutdown_tx.send(()).await.unwrap();
    wait_until(|| registry.is_closed()).await;

    let key = signing_key(41);
    send_response(&mut host, &permanent_response(&key, &challenge, "Agent1")).await;

    tokio::time::timeout(Duration::from_secs(3), server)
        .await
        .expect("server should not wait for the shutdown timeout")
        .unwrap()
        .unwrap();
    assert!(read_until_closed(&mut host).await.is_empty());
    assert!(registry.is_empty());
    assert_eq!(harness.ctx.metrics.snapshot().handshakes_success, 1);
}
