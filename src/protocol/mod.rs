//! # Protocol Layer
//!
//! The HostConnect handshake and keepalive discipline.
//!
//! ## Components
//! - **Handshake**: challenge/response authentication and identity resolution
//! - **KeepAlive**: outbound idle tracking and dead-peer detection
//!
//! ## Security
//! - 32-byte challenge from the OS entropy source, fresh per connection
//! - Permanent hosts must sign the challenge with their identity key
//! - Every handshake read and write is bounded by the pre-auth timeout

pub mod handshake;
pub mod keepalive;
