//! # Error Types
//!
//! Error handling for the HostConnect server.
//!
//! Every failure is classified into one of three kinds so that callers branch
//! on what happened rather than on which I/O call produced it:
//!
//! ## Error Categories
//! - **Transport**: timeouts, resets and clean closes. These are ordinary
//!   disconnects and are logged at info level.
//! - **Protocol violations**: malformed or invalid handshake content and bad
//!   frame lengths. Handshake violations carry a named [`AuthFailure`].
//! - **Unexpected**: storage failures, entropy failures and anything else the
//!   server did not anticipate. Logged at debug level with the computer
//!   identity when known.
//!
//! ## Example Usage
//! ```rust
//! use host_connect::error::{ErrorKind, ProtocolError};
//!
//! let err = ProtocolError::ConnectionClosed;
//! assert_eq!(err.kind(), ErrorKind::TransportClosed);
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake rejection reasons (user-facing)
    pub const ERR_AUTH_RESPONSE_LENGTH: &str =
        "Authentication response length must be greater than zero.";
    pub const ERR_SIGNATURE_LENGTH: &str = "Authentication response specified 0-length signature.";
    pub const ERR_SECURITY_KEY_LENGTH: &str =
        "Authentication response specified 0-length security key.";
    pub const ERR_PUBLIC_KEY_LENGTH: &str =
        "Authentication response specified 0-length public key.";
    pub const ERR_NAME_LENGTH: &str = "Authentication response specified 0-length computer name.";
    pub const ERR_SIGNATURE_VERIFICATION_FAILED: &str = "Signature verification failed.";
    pub const ERR_FAILED_TO_ADD_COMPUTER: &str = "Failed to add computer.";
    pub const ERR_AUTH_RESPONSE_COMMAND: &str =
        "Authentication response must begin with Command.ClientAuthentication.";
    pub const ERR_AUTH_RESPONSE_TRUNCATED: &str =
        "Authentication response ended before all required fields were read.";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Store errors
    pub const ERR_STORE_LOCK_POISONED: &str = "Computer store lock poisoned";
    pub const ERR_UNKNOWN_COMPUTER: &str = "No computer with this ID";
    pub const ERR_DUPLICATE_PUBLIC_KEY: &str = "A computer with this public key already exists";

    /// Clock
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// Named reasons a handshake can be rejected.
///
/// The `Display` form is the message handed back to the outer server.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("{}", constants::ERR_AUTH_RESPONSE_LENGTH)]
    AuthResponseLength,

    #[error("{}", constants::ERR_SIGNATURE_LENGTH)]
    SignatureLength,

    #[error("{}", constants::ERR_SECURITY_KEY_LENGTH)]
    SecurityKeyLength,

    #[error("{}", constants::ERR_PUBLIC_KEY_LENGTH)]
    PublicKeyLength,

    #[error("{}", constants::ERR_NAME_LENGTH)]
    NameLength,

    #[error("{}", constants::ERR_SIGNATURE_VERIFICATION_FAILED)]
    SignatureVerificationFailed,

    #[error("{}", constants::ERR_AUTH_RESPONSE_COMMAND)]
    AuthResponseCommand,

    #[error("{}", constants::ERR_FAILED_TO_ADD_COMPUTER)]
    FailedToAddComputer,

    #[error("{}", constants::ERR_AUTH_RESPONSE_TRUNCATED)]
    AuthResponseTruncated,
}

// ProtocolError is the primary error type for all HostConnect operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Handshake rejected: {0}")]
    Handshake(AuthFailure),

    #[error("Invalid length for {field}: {length}")]
    InvalidLength { field: &'static str, length: i64 },

    #[error("Field {field} is too long: {length} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Entropy error: {0}")]
    Entropy(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<AuthFailure> for ProtocolError {
    fn from(reason: AuthFailure) -> Self {
        ProtocolError::Handshake(reason)
    }
}

/// Coarse classification used to decide how a failure is logged and whether
/// it counts as an ordinary disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, reset or clean close.
    TransportClosed,
    /// Malformed or invalid protocol content.
    ProtocolViolation(String),
    /// Anything else.
    Unexpected(String),
}

impl ProtocolError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed | ProtocolError::Timeout => {
                ErrorKind::TransportClosed
            }
            ProtocolError::Handshake(reason) => ErrorKind::ProtocolViolation(reason.to_string()),
            ProtocolError::InvalidLength { .. }
            | ProtocolError::FieldTooLong { .. }
            | ProtocolError::InvalidUtf8(_) => ErrorKind::ProtocolViolation(self.to_string()),
            ProtocolError::Storage(_)
            | ProtocolError::Entropy(_)
            | ProtocolError::ConfigError(_)
            | ProtocolError::Custom(_) => ErrorKind::Unexpected(self.to_string()),
        }
    }

    /// True for timeouts, resets and clean closes.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransportClosed)
    }

    /// The named handshake reason, if this is a handshake rejection.
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            ProtocolError::Handshake(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
