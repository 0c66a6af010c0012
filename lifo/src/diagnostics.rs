//! Diagnostic endpoint
//!
//! Every connection to the diagnostic listener receives one JSON
//! [`DiagnosticSnapshot`] followed by a newline, then the server closes it.
//! There is no request; connecting is the request.

use crate::server::AppState;
use lifo_core::{DiagnosticSnapshot, LifoError, Result};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// Serialize a snapshot as it goes on the wire.
pub fn encode_snapshot(snapshot: &DiagnosticSnapshot) -> Result<Vec<u8>> {
    let mut body =
        serde_json::to_vec(snapshot).map_err(|e| LifoError::Serialization(e.to_string()))?;
    body.push(b'\n');
    Ok(body)
}

/// Write one snapshot and close the stream.
pub async fn write_snapshot<S>(mut stream: S, snapshot: &DiagnosticSnapshot) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = encode_snapshot(snapshot)?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Run the diagnostic server
pub async fn run_diagnostic_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    info!(
        target: "lifo::diagnostics",
        addr = ?listener.local_addr().ok(),
        "Diagnostic server listening"
    );

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let snapshot = state.snapshot();
                        trace!(
                            target: "lifo::diagnostics",
                            peer = %peer,
                            live = snapshot.live_connections,
                            depth = snapshot.stack_depth,
                            total = snapshot.total_connections_ever_accepted,
                            "Serving snapshot"
                        );

                        tokio::spawn(async move {
                            if let Err(e) = write_snapshot(stream, &snapshot).await {
                                debug!(target: "lifo::diagnostics", peer = %peer, error = %e, "Diagnostic connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(target: "lifo::diagnostics", error = %e, "Diagnostic accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(target: "lifo::diagnostics", "Diagnostic server shutting down");
                break;
            }
        }
    }

    Ok(())
}
