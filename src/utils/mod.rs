//! # Utility Modules
//!
//! Supporting utilities for signatures, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: challenge generation and Ed25519 signature verification
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Wall-clock timestamps for disconnect stamps
//! - **Timeout**: Async timeout wrappers and protocol timing constants
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Malformed keys and signatures fail closed

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot, Timer};
