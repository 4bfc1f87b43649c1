//! # Transport Layer
//!
//! TCP listener that feeds accepted sockets into [`serve_host`](crate::service::serve_host).
//!
//! ## Shutdown
//! The listener stops accepting, disconnects every registered host, then
//! waits up to `server.shutdown_timeout` for sessions to finish.

pub mod tcp;

pub use tcp::{serve_listener, start_server, start_server_with_shutdown};
