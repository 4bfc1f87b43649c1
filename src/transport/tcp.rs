use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::service::{serve_host, HostConnectResult, HostContext};

/// Start the HostConnect listener on `ctx.config.server.address`.
///
/// Runs until CTRL+C, then disconnects every host and drains.
#[instrument(skip(ctx), fields(address = %ctx.config.server.address))]
pub async fn start_server(ctx: HostContext) -> Result<()> {
    // Create internal shutdown channel
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(ctx, shutdown_rx).await
}

/// Start the listener with an external shutdown channel.
#[instrument(skip(ctx, shutdown_rx), fields(address = %ctx.config.server.address))]
pub async fn start_server_with_shutdown(
    ctx: HostContext,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&ctx.config.server.address).await?;
    serve_listener(listener, ctx, shutdown_rx).await
}

/// Accept hosts on an already-bound listener until `shutdown_rx` fires.
pub async fn serve_listener(
    listener: TcpListener,
    ctx: HostContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let max_connections = ctx.config.server.max_connections;
    let permits = Arc::new(Semaphore::new(max_connections));
    info!(
        address = %listener.local_addr()?,
        max_connections,
        "Listening for hosts"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Disconnecting hosts...");
                let signalled = ctx.registry.close();
                info!(hosts = signalled, "Disconnected registered hosts");

                drain(&permits, max_connections, ctx.config.server.shutdown_timeout).await;
                ctx.metrics.log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    ctx.metrics.connection_refused();
                    warn!(%peer, max_connections, "Connection limit reached, refusing host");
                    continue;
                };

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                }

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match serve_host(stream, &ctx).await {
                        HostConnectResult::Rejected(reason) => {
                            info!(%peer, %reason, "Host rejected");
                        }
                        HostConnectResult::Closed { computer_id } => {
                            debug!(%peer, ?computer_id, "Host session ended");
                        }
                    }
                    drop(permit);
                });
            }
        }
    }
}

/// Wait for in-flight sessions to return their permits, bounded by `timeout`.
async fn drain(permits: &Semaphore, max_connections: usize, timeout: Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let active = max_connections - permits.available_permits();
        if active == 0 {
            info!("All connections closed, shutting down");
            return;
        }

        tokio::select! {
            _ = &mut deadline => {
                warn!(connections = active, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                debug!(connections = active, "Waiting for connections to close");
            }
        }
    }
}
