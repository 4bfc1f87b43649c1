//! Host-side helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use host_connect::config::HostConnectConfig;
use host_connect::core::command::{AuthenticationType, Command};
use host_connect::protocol::handshake::AuthResponse;
use host_connect::service::{serve_host, HostConnectResult, HostContext, HostStatusSink};
use host_connect::store::{ComputerId, MemoryComputerStore};
use host_connect::utils::crypto::{Ed25519Verifier, CHALLENGE_LEN};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Status sink that keeps every payload it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<(ComputerId, Bytes)>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<(ComputerId, Bytes)> {
        self.received.lock().unwrap().clone()
    }
}

impl HostStatusSink for RecordingSink {
    fn on_host_status(&self, computer_id: ComputerId, payload: Bytes) {
        self.received.lock().unwrap().push((computer_id, payload));
    }
}

pub struct Harness {
    pub ctx: HostContext,
    pub store: Arc<MemoryComputerStore>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HostConnectConfig::default())
    }

    pub fn with_config(config: HostConnectConfig) -> Self {
        let store = Arc::new(MemoryComputerStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ctx = HostContext::new(store.clone())
            .with_config(config)
            .with_status_sink(sink.clone());
        Self { ctx, store, sink }
    }

    /// Open an in-memory connection served by `serve_host`.
    pub fn connect(&self) -> (DuplexStream, JoinHandle<HostConnectResult>) {
        let (host, server) = duplex(64 * 1024);
        let ctx = self.ctx.clone();
        let session = tokio::spawn(async move { serve_host(server, &ctx).await });
        (host, session)
    }
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key(key: &SigningKey) -> String {
    Ed25519Verifier::encode_public_key(&key.verifying_key())
}

pub async fn read_challenge<S: AsyncRead + Unpin>(host: &mut S) -> [u8; CHALLENGE_LEN] {
    assert_eq!(host.read_u8().await.unwrap(), Command::Authenticate.as_byte());
    let mut challenge = [0u8; CHALLENGE_LEN];
    host.read_exact(&mut challenge).await.unwrap();
    challenge
}

pub fn permanent_response(key: &SigningKey, challenge: &[u8], name: &str) -> AuthResponse {
    AuthResponse {
        auth_type: AuthenticationType::PermanentHost,
        security_key: "download-key".into(),
        signature: Bytes::copy_from_slice(&key.sign(challenge).to_bytes()),
        public_key: public_key(key),
        name: name.into(),
        app_version: "2.4.1".into(),
        os_version: "Windows 11".into(),
    }
}

pub async fn send_response<S: AsyncWrite + Unpin>(host: &mut S, response: &AuthResponse) {
    host.write_all(&response.encode().unwrap()).await.unwrap();
}

/// Run the host side of a successful permanent-host handshake.
pub async fn authenticate<S>(host: &mut S, key: &SigningKey, name: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = read_challenge(host).await;
    send_response(host, &permanent_response(key, &challenge, name)).await;
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Read until the server closes the connection.
pub async fn read_until_closed<S: AsyncRead + Unpin>(host: &mut S) -> Vec<u8> {
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), host.read_to_end(&mut rest))
        .await
        .expect("server did not close the connection")
        .unwrap();
    rest
}
