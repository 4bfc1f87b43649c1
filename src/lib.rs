//! # host-connect
//!
//! Server side of the HostConnect protocol: long-lived, authenticated
//! connections from remote host agents to a central server.
//!
//! A host connects over TCP, proves its identity by signing a random
//! challenge, and then stays connected indefinitely. The server keeps the
//! connection alive through idle periods and can reach any online host by
//! its computer ID, most notably to ask it to open a proxied WebSocket
//! session.
//!
//! ## Layers
//! - [`core`]: opcodes and timed field framing
//! - [`protocol`]: the authentication handshake and keepalive state machine
//! - [`service`]: connection handles, the host registry and `serve_host`
//! - [`store`]: the computer persistence boundary
//! - [`transport`]: the TCP listener
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging,
//!   metrics and timing
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use host_connect::config::HostConnectConfig;
//! use host_connect::service::HostContext;
//! use host_connect::store::MemoryComputerStore;
//!
//! # async fn run() -> host_connect::error::Result<()> {
//! let config = HostConnectConfig::from_file("host-connect.toml")?;
//! config.validate_strict()?;
//! host_connect::utils::logging::init_logging(&config.logging)?;
//!
//! let ctx = HostContext::new(Arc::new(MemoryComputerStore::new())).with_config(config);
//! let registry = Arc::clone(&ctx.registry);
//! tokio::spawn(host_connect::transport::start_server(ctx));
//!
//! if let Some(host) = registry.lookup_online_computer(1) {
//!     host.request_websocket_proxy("203.0.113.7".parse().unwrap(), "proxy-key").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::HostConnectConfig;
pub use error::{AuthFailure, ErrorKind, ProtocolError, Result};
pub use service::{serve_host, HostConnectResult, HostContext, HostHandle, HostRegistry};
