//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// Milliseconds since the Unix epoch.
///
/// # Errors
/// Returns a `ProtocolError::Custom` if the system time is earlier than UNIX_EPOCH
pub fn current_timestamp_ms() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}
