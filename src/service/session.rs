//! Per-connection driver.
//!
//! [`serve_host`] owns an accepted socket from the first byte to teardown:
//! handshake under the pre-auth timeout, handle installation, the command
//! loop under the session timeout, then removal and disconnect.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument, warn, Span};

use super::handle::HostHandle;
use super::HostContext;
use crate::core::command::Command;
use crate::core::frame::{FrameReader, FrameWriter};
use crate::error::{AuthFailure, ErrorKind, ProtocolError, Result};
use crate::protocol::handshake::authenticate;
use crate::store::ComputerId;
use crate::utils::metrics::Timer;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostConnectResult {
    /// The handshake was refused for a named reason.
    Rejected(AuthFailure),
    /// The connection closed. `computer_id` is set when the host had
    /// authenticated.
    Closed { computer_id: Option<ComputerId> },
}

/// Serve one host connection until it ends.
///
/// Never returns an error: every failure is logged here and folded into the
/// returned [`HostConnectResult`].
#[instrument(skip_all, fields(computer_id))]
pub async fn serve_host<S>(stream: S, ctx: &HostContext) -> HostConnectResult
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    ctx.metrics.connection_established();
    let result = run(stream, ctx).await;
    ctx.metrics.connection_closed();
    result
}

async fn run<S>(stream: S, ctx: &HostContext) -> HostConnectResult
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let config = &ctx.config;
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, config.timeouts.auth);
    let mut writer = FrameWriter::new(write_half, config.timeouts.auth);

    ctx.metrics.handshake_attempt();
    let authenticated = {
        let _timer = Timer::start("handshake");
        authenticate(
            &mut reader,
            &mut writer,
            ctx.store.as_ref(),
            ctx.verifier.as_ref(),
            config.identity.default_group_id,
        )
        .await
    };
    let authenticated = match authenticated {
        Ok(authenticated) => authenticated,
        Err(e) => return handshake_failed(e, ctx),
    };

    let computer_id = authenticated.computer.id;
    Span::current().record("computer_id", computer_id);
    ctx.metrics.handshake_success();
    info!(
        name = %authenticated.computer.name,
        is_new = authenticated.is_new,
        auth_type = ?authenticated.auth_type,
        "Host authenticated"
    );

    reader.set_timeout(config.timeouts.session);
    writer.set_timeout(config.timeouts.session);

    let handle = HostHandle::new(
        computer_id,
        writer.boxed(),
        &config.keepalive,
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.metrics),
    );
    if ctx.registry.register(Arc::clone(&handle)).is_some() {
        ctx.metrics.eviction();
    }
    let keepalive = handle.spawn_keepalive(config.keepalive.check_interval);

    let outcome = command_loop(&mut reader, &handle, ctx).await;

    ctx.registry.remove_if_current(computer_id, &handle);
    handle.disconnect();
    if let Err(e) = keepalive.await {
        debug!(error = %e, "Keepalive task ended abnormally");
    }

    match outcome {
        Ok(()) => info!("Connection closed by server"),
        Err(e) => log_session_error(&e, ctx),
    }
    HostConnectResult::Closed {
        computer_id: Some(computer_id),
    }
}

fn handshake_failed(err: ProtocolError, ctx: &HostContext) -> HostConnectResult {
    if let Some(reason) = err.auth_failure() {
        ctx.metrics.handshake_rejected();
        info!(%reason, "Handshake rejected");
        return HostConnectResult::Rejected(reason);
    }

    match err.kind() {
        ErrorKind::TransportClosed => info!(error = %err, "Connection closed during handshake"),
        ErrorKind::ProtocolViolation(reason) => {
            ctx.metrics.protocol_error();
            info!(%reason, "Invalid handshake data");
        }
        ErrorKind::Unexpected(detail) => debug!(%detail, "Handshake failed"),
    }
    HostConnectResult::Closed { computer_id: None }
}

fn log_session_error(err: &ProtocolError, ctx: &HostContext) {
    match err.kind() {
        ErrorKind::TransportClosed => {
            ctx.metrics.connection_error();
            info!(error = %err, "Host connection closed");
        }
        ErrorKind::ProtocolViolation(reason) => {
            ctx.metrics.protocol_error();
            warn!(%reason, "Host sent invalid data, closing connection");
        }
        ErrorKind::Unexpected(detail) => debug!(%detail, "Host connection failed"),
    }
}

/// Read commands until the host goes away or the handle is disconnected.
async fn command_loop<R>(
    reader: &mut FrameReader<R>,
    handle: &HostHandle,
    ctx: &HostContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = handle.closed() => return Ok(()),
            result = next_command(reader, handle, ctx) => result?,
        }
    }
}

async fn next_command<R>(
    reader: &mut FrameReader<R>,
    handle: &HostHandle,
    ctx: &HostContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let opcode = reader.read_u8().await?;
    match Command::from_byte(opcode) {
        Some(Command::HostStatus) => {
            let length = reader.read_i32().await?;
            let max = ctx.config.limits.max_host_status_size;
            let length = usize::try_from(length)
                .ok()
                .filter(|len| *len <= max)
                .ok_or(ProtocolError::InvalidLength {
                    field: "host_status",
                    length: i64::from(length),
                })?;
            let payload = reader.read_exact_bytes(length).await?;
            ctx.metrics.host_status(payload.len() as u64);
            ctx.status_sink.on_host_status(handle.computer_id(), payload);
        }
        Some(Command::KeepAlive) => {
            ctx.metrics.keepalive_received();
            debug!("Received keepalive");
        }
        _ => {
            ctx.metrics.unknown_command();
            debug!(opcode, "Unknown command");
            handle.send_unknown_command().await?;
        }
    }
    Ok(())
}
