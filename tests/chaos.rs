#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Misbehaving hosts: garbage, hangups and silence.

mod common;

use std::time::Duration;

use common::*;
use host_connect::core::command::Command;
use host_connect::HostConnectResult;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_random_garbage_after_challenge() {
    let harness = Harness::new();
    let mut rng = rand::rng();

    for _ in 0..50 {
        let (mut host, session) = harness.connect();
        read_challenge(&mut host).await;

        let len = rng.random_range(1..256);
        let garbage: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        host.write_all(&garbage).await.unwrap();
        drop(host);

        // Whatever the bytes were, the session ends cleanly.
        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session should end once the host hangs up")
            .unwrap();
        assert!(matches!(
            result,
            HostConnectResult::Rejected(_) | HostConnectResult::Closed { .. }
        ));
    }
}

#[tokio::test]
async fn test_hangup_at_every_point_of_handshake() {
    let harness = Harness::new();
    let key = signing_key(30);

    let (mut probe, _) = harness.connect();
    let challenge = read_challenge(&mut probe).await;
    let frame = permanent_response(&key, &challenge, "Agent1").encode().unwrap();
    drop(probe);

    for cut in 0..frame.len() {
        let (mut host, session) = harness.connect();
        read_challenge(&mut host).await;
        host.write_all(&frame[..cut]).await.unwrap();
        drop(host);

        assert_eq!(
            session.await.unwrap(),
            HostConnectResult::Closed { computer_id: None },
            "hangup after {cut} bytes"
        );
    }
    assert!(harness.store.is_empty());
    assert!(harness.ctx.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_host_times_out_during_handshake() {
    let harness = Harness::new();
    let (mut host, session) = harness.connect();
    read_challenge(&mut host).await;

    let started = tokio::time::Instant::now();
    assert_eq!(
        session.await.unwrap(),
        HostConnectResult::Closed { computer_id: None }
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() < Duration::from_secs(75));
}

#[tokio::test(start_paused = true)]
async fn test_silent_authenticated_host_times_out() {
    let harness = Harness::new();
    let key = signing_key(31);
    let (mut host, session) = harness.connect();
    authenticate(&mut host, &key, "Agent1").await;

    let result = session.await.unwrap();
    assert!(matches!(
        result,
        HostConnectResult::Closed {
            computer_id: Some(_)
        }
    ));
    assert!(harness.ctx.registry.is_empty());
    assert_eq!(harness.ctx.metrics.snapshot().connection_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_host_keepalives_hold_session_open() {
    let harness = Harness::new();
    let key = signing_key(32);
    let (mut host, session) = harness.connect();
    authenticate(&mut host, &key, "Agent1").await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        host.write_all(&[Command::KeepAlive.as_byte()]).await.unwrap();
    }

    let metrics = harness.ctx.metrics.clone();
    wait_until(|| metrics.snapshot().keepalives_received == 5).await;
    assert!(!session.is_finished());
    assert_eq!(harness.ctx.registry.len(), 1);

    // The server kept its side alive too.
    assert!(metrics.snapshot().keepalives_sent >= 2);
    assert_eq!(host.read_u8().await.unwrap(), Command::KeepAlive.as_byte());
}
