//! Connection handle for one authenticated host.
//!
//! The handle owns the write half of the socket. Every outbound frame, the
//! keepalive included, goes through one `tokio::sync::Mutex` that also
//! guards the [`KeepAlive`] state, so a keepalive is only sent when nothing
//! else was written in the meantime.
//!
//! Teardown is [`HostHandle::disconnect`]: synchronous, idempotent, and the
//! only thing that fires the handle's shutdown signal.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::KeepAliveConfig;
use crate::core::command::Command;
use crate::core::frame::{BoxedWriter, FrameBuilder, FrameWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::keepalive::{KeepAlive, KeepAliveAction};
use crate::store::{ComputerId, ComputerStore};
use crate::utils::metrics::Metrics;
use crate::utils::time::current_timestamp_ms;

/// State behind the write guard.
struct Outbound {
    /// `None` once the handle is torn down.
    writer: Option<FrameWriter<BoxedWriter>>,
    keepalive: KeepAlive,
}

pub struct HostHandle {
    computer_id: ComputerId,
    connected_at: SystemTime,
    outbound: Mutex<Outbound>,
    disconnected: AtomicBool,
    shutdown: CancellationToken,
    store: Arc<dyn ComputerStore>,
    metrics: Arc<Metrics>,
}

impl HostHandle {
    pub fn new(
        computer_id: ComputerId,
        writer: FrameWriter<BoxedWriter>,
        keepalive: &KeepAliveConfig,
        store: Arc<dyn ComputerStore>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            computer_id,
            connected_at: SystemTime::now(),
            outbound: Mutex::new(Outbound {
                writer: Some(writer),
                keepalive: KeepAlive::new(keepalive.interval, keepalive.timeout, Instant::now()),
            }),
            disconnected: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            store,
            metrics,
        })
    }

    pub fn computer_id(&self) -> ComputerId {
        self.computer_id
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Resolves once [`disconnect`](Self::disconnect) has run.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Ask the host to open a proxied WebSocket session.
    ///
    /// Fire-and-forget: the host answers by opening a new connection, not
    /// on this socket. A failed write tears the handle down.
    pub async fn request_websocket_proxy(&self, source_ip: IpAddr, proxy_key: &str) -> Result<()> {
        let mut frame = FrameBuilder::command(Command::WebSocketConnectionRequest);
        frame.put_utf8_u16("proxy_key", proxy_key)?;
        frame.put_utf8_u16("source_ip", &source_ip.to_string())?;
        self.send(&frame.finish()).await?;

        self.metrics.proxy_request();
        info!(computer_id = self.computer_id, %source_ip, "Requested WebSocket proxy");
        Ok(())
    }

    /// Reply to an opcode the server does not understand.
    pub(crate) async fn send_unknown_command(&self) -> Result<()> {
        self.send(&[Command::ErrorCommandCodeUnknown.as_byte()])
            .await
    }

    /// One keepalive timer tick.
    ///
    /// The decision and the send happen under the write guard, so traffic
    /// written while waiting for the guard suppresses the keepalive.
    pub async fn keepalive_tick(&self) -> KeepAliveAction {
        if self.is_disconnected() {
            return KeepAliveAction::Idle;
        }

        let mut outbound = self.outbound.lock().await;
        let action = outbound.keepalive.poll(Instant::now());
        match action {
            KeepAliveAction::Idle => {}
            KeepAliveAction::SendKeepAlive => {
                let sent = self
                    .write_locked(&mut outbound, &[Command::KeepAlive.as_byte()])
                    .await;
                drop(outbound);
                match sent {
                    Ok(()) => {
                        self.metrics.keepalive_sent();
                        debug!(computer_id = self.computer_id, "Sent keepalive");
                    }
                    Err(e) => {
                        debug!(computer_id = self.computer_id, error = %e, "Keepalive send failed");
                        self.disconnect();
                    }
                }
            }
            KeepAliveAction::TimedOut => {
                let idle = outbound.keepalive.idle_for(Instant::now());
                drop(outbound);
                warn!(
                    computer_id = self.computer_id,
                    idle_secs = idle.as_secs(),
                    "No outbound traffic within keepalive timeout, disconnecting"
                );
                self.metrics.keepalive_timeout();
                self.disconnect();
            }
        }
        action
    }

    /// Start the keepalive timer. It stops when the handle disconnects.
    pub fn spawn_keepalive(self: &Arc<Self>, check_interval: Duration) -> JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = handle.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if handle.keepalive_tick().await == KeepAliveAction::TimedOut {
                            break;
                        }
                    }
                }
            }
            debug!(computer_id = handle.computer_id, "Keepalive timer stopped");
        })
    }

    /// Tear the connection down. Safe to call any number of times from any
    /// task; only the first call has an effect.
    ///
    /// Never touches the registry, so it may run inside a registry update.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        // A writer holding the guard sees the cancellation, abandons its
        // write and releases the socket itself.
        if let Ok(mut outbound) = self.outbound.try_lock() {
            outbound.writer = None;
        }

        info!(computer_id = self.computer_id, "Host disconnected");
        if let Err(e) = current_timestamp_ms()
            .and_then(|now| self.store.update_last_disconnect(self.computer_id, now))
        {
            debug!(
                computer_id = self.computer_id,
                error = %e,
                "Failed to record last disconnect time"
            );
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut outbound = self.outbound.lock().await;
        let result = self.write_locked(&mut outbound, frame).await;
        drop(outbound);

        if let Err(e) = &result {
            if e.is_transport() {
                self.disconnect();
            }
        }
        result
    }

    async fn write_locked(&self, outbound: &mut Outbound, frame: &[u8]) -> Result<()> {
        if self.is_disconnected() {
            outbound.writer = None;
            return Err(ProtocolError::ConnectionClosed);
        }
        let writer = outbound
            .writer
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;

        // Teardown aborts a write the peer is not draining.
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = writer.write_frame(frame) => result,
        };
        match &result {
            Ok(()) => outbound.keepalive.mark_activity(Instant::now()),
            Err(_) => outbound.writer = None,
        }
        if self.is_disconnected() {
            outbound.writer = None;
        }
        result
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("computer_id", &self.computer_id)
            .field("connected_at", &self.connected_at)
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryComputerStore, NewComputer};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn keepalive_config() -> KeepAliveConfig {
        KeepAliveConfig {
            interval: Duration::from_secs(120),
            timeout: Duration::from_secs(300),
            check_interval: Duration::from_secs(1),
        }
    }

    fn fixture() -> (Arc<HostHandle>, Arc<MemoryComputerStore>, DuplexStream) {
        fixture_with_capacity(1024)
    }

    fn fixture_with_capacity(
        capacity: usize,
    ) -> (Arc<HostHandle>, Arc<MemoryComputerStore>, DuplexStream) {
        let store = Arc::new(MemoryComputerStore::new());
        let computer = store
            .insert_computer(&NewComputer {
                public_key: "key".into(),
                name: "Agent1".into(),
                app_version: "1.0".into(),
                os_version: "Linux".into(),
                last_disconnect_ms: 0,
            })
            .unwrap();
        let (peer, server) = duplex(capacity);
        let writer = FrameWriter::new(server, Duration::from_secs(75)).boxed();
        let handle = HostHandle::new(
            computer.id,
            writer,
            &keepalive_config(),
            store.clone(),
            Arc::new(Metrics::new()),
        );
        (handle, store, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_traffic_suppresses_keepalive() {
        let (handle, _store, mut peer) = fixture();

        tokio::time::advance(Duration::from_secs(100)).await;
        handle
            .request_websocket_proxy("10.0.0.5".parse().unwrap(), "k1")
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(handle.keepalive_tick().await, KeepAliveAction::Idle);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(handle.keepalive_tick().await, KeepAliveAction::SendKeepAlive);

        let mut proxy = [0u8; 1 + 2 + 2 + 2 + 8];
        peer.read_exact(&mut proxy).await.unwrap();
        assert_eq!(proxy[0], Command::WebSocketConnectionRequest.as_byte());
        assert_eq!(&proxy[1..5], &[0, 2, b'k', b'1']);
        assert_eq!(&proxy[5..], b"\x00\x0810.0.0.5");
        assert_eq!(peer.read_u8().await.unwrap(), Command::KeepAlive.as_byte());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_sends_keepalive_on_idle_connection() {
        let (handle, _store, mut peer) = fixture();
        let timer = handle.spawn_keepalive(Duration::from_secs(1));

        assert_eq!(peer.read_u8().await.unwrap(), Command::KeepAlive.as_byte());

        handle.disconnect();
        timer.await.unwrap();
        assert_eq!(handle.metrics.snapshot().keepalives_sent, 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (handle, store, mut peer) = fixture();

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.disconnect() })
            })
            .collect();
        for racer in racers {
            racer.await.unwrap();
        }
        handle.disconnect();

        assert!(handle.is_disconnected());
        assert_eq!(store.disconnect_count(handle.computer_id()), 1);

        // The write half is gone; the peer sees nothing further.
        let err = handle.send_unknown_command().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
        drop(handle);
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_stalled_write() {
        let (handle, _store, mut peer) = fixture_with_capacity(16);
        let key = "k".repeat(1000);
        let write = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .request_websocket_proxy("10.0.0.5".parse().unwrap(), &key)
                    .await
            })
        };

        // The pipe fills and the write parks holding the guard.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!write.is_finished());
        assert!(handle.outbound.try_lock().is_err());

        handle.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), write)
            .await
            .expect("write should end well before the session write timeout")
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
        assert!(handle.outbound.try_lock().unwrap().writer.is_none());
        assert_eq!(handle.metrics.snapshot().proxy_requests, 0);

        // Only what fit in the pipe arrived, then EOF.
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 16);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_disconnect() {
        let (handle, store, _peer) = fixture();
        store.set_fail_writes(true);
        handle.disconnect();
        assert!(handle.is_disconnected());
        assert_eq!(store.disconnect_count(handle.computer_id()), 0);
    }
}
