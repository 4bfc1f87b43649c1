//! Observability and Metrics
//!
//! Counters for connection, handshake and command-loop activity.
//!
//! Uses atomic counters for thread-safe metrics collection. A [`Metrics`]
//! instance is owned by the server context and shared with every handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for HostConnect operations
#[derive(Debug)]
pub struct Metrics {
    /// Total sockets accepted
    pub connections_total: AtomicU64,
    /// Sockets currently being served
    pub connections_active: AtomicU64,
    /// Sockets refused because the connection limit was reached
    pub connections_refused: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Handshakes rejected with a named reason
    pub handshakes_rejected: AtomicU64,
    /// Handles evicted by a reconnect of the same computer
    pub evictions: AtomicU64,
    /// KeepAlive frames sent to hosts
    pub keepalives_sent: AtomicU64,
    /// KeepAlive frames received from hosts
    pub keepalives_received: AtomicU64,
    /// Hosts dropped by the dead-peer timeout
    pub keepalive_timeouts: AtomicU64,
    /// HostStatus frames received
    pub host_status_received: AtomicU64,
    /// HostStatus payload bytes received
    pub host_status_bytes: AtomicU64,
    /// Unknown opcodes answered with ErrorCommandCodeUnknown
    pub unknown_commands: AtomicU64,
    /// WebSocket proxy requests sent
    pub proxy_requests: AtomicU64,
    /// Transport-level failures after authentication
    pub connection_errors: AtomicU64,
    /// Protocol violations
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            keepalives_received: AtomicU64::new(0),
            keepalive_timeouts: AtomicU64::new(0),
            host_status_received: AtomicU64::new(0),
            host_status_bytes: AtomicU64::new(0),
            unknown_commands: AtomicU64::new(0),
            proxy_requests: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection refused at the limit
    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_received(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_timeout(&self) {
        self.keepalive_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a HostStatus frame and its payload size
    pub fn host_status(&self, byte_count: u64) {
        self.host_status_received.fetch_add(1, Ordering::Relaxed);
        self.host_status_bytes.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn unknown_command(&self) {
        self.unknown_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_request(&self) {
        self.proxy_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
            keepalive_timeouts: self.keepalive_timeouts.load(Ordering::Relaxed),
            host_status_received: self.host_status_received.load(Ordering::Relaxed),
            host_status_bytes: self.host_status_bytes.load(Ordering::Relaxed),
            unknown_commands: self.unknown_commands.load(Ordering::Relaxed),
            proxy_requests: self.proxy_requests.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_refused = snapshot.connections_refused,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_rejected = snapshot.handshakes_rejected,
            evictions = snapshot.evictions,
            keepalives_sent = snapshot.keepalives_sent,
            keepalives_received = snapshot.keepalives_received,
            keepalive_timeouts = snapshot.keepalive_timeouts,
            host_status_received = snapshot.host_status_received,
            host_status_bytes = snapshot.host_status_bytes,
            unknown_commands = snapshot.unknown_commands,
            proxy_requests = snapshot.proxy_requests,
            connection_errors = snapshot.connection_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "HostConnect metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_rejected: u64,
    pub evictions: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub keepalive_timeouts: u64,
    pub host_status_received: u64,
    pub host_status_bytes: u64,
    pub unknown_commands: u64,
    pub proxy_requests: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
