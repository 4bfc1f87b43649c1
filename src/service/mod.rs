//! # Service Layer
//!
//! Everything that happens to a host after the socket is accepted.
//!
//! ## Components
//! - **HostHandle**: one authenticated connection and its outbound side
//! - **HostRegistry**: computer ID to live handle, with reconnect eviction
//! - **Session**: `serve_host`, the handshake followed by the command loop
//!
//! Shared collaborators travel in a [`HostContext`], cloned into every
//! connection task.

pub mod handle;
pub mod registry;
pub mod session;

pub use handle::HostHandle;
pub use registry::HostRegistry;
pub use session::{serve_host, HostConnectResult};

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::HostConnectConfig;
use crate::store::{ComputerId, ComputerStore};
use crate::utils::crypto::{Ed25519Verifier, SignatureVerifier};
use crate::utils::metrics::Metrics;

/// Receiver for `HostStatus` payloads.
///
/// Called from the connection's command loop; implementations must not
/// block.
pub trait HostStatusSink: Send + Sync {
    fn on_host_status(&self, computer_id: ComputerId, payload: Bytes);
}

/// Sink that only logs the payload size.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusSink;

impl HostStatusSink for LoggingStatusSink {
    fn on_host_status(&self, computer_id: ComputerId, payload: Bytes) {
        info!(computer_id, bytes = payload.len(), "Received host status");
    }
}

/// Collaborators shared by every connection.
#[derive(Clone)]
pub struct HostContext {
    pub config: Arc<HostConnectConfig>,
    pub registry: Arc<HostRegistry>,
    pub store: Arc<dyn ComputerStore>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub status_sink: Arc<dyn HostStatusSink>,
    pub metrics: Arc<Metrics>,
}

impl HostContext {
    /// Context with default configuration, an empty registry, Ed25519
    /// verification and a logging status sink.
    pub fn new(store: Arc<dyn ComputerStore>) -> Self {
        Self {
            config: Arc::new(HostConnectConfig::default()),
            registry: Arc::new(HostRegistry::new()),
            store,
            verifier: Arc::new(Ed25519Verifier),
            status_sink: Arc::new(LoggingStatusSink),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_config(mut self, config: HostConnectConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_registry(mut self, registry: Arc<HostRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn HostStatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("config", &self.config)
            .field("online", &self.registry.len())
            .finish_non_exhaustive()
    }
}
