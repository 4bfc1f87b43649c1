//! Timeout defaults and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Read/write bound before a host has authenticated.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Read/write bound once authenticated. Hosts send a keepalive every 60s,
/// plus 15s of slack for bad network conditions.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(75);

/// Outbound idle time after which the server sends a keepalive.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Outbound idle time after which the peer is considered dead.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the keepalive timer wakes up to check.
pub const KEEPALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Time allowed for sessions to drain on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
