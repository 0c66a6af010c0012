//! Server module - TCP listeners and orchestration
//!
//! This module contains the app listener's accept loop, which registers every
//! connection, runs admission control and spawns one task per admitted
//! connection. [`start`] binds both listeners and returns a [`RunningServer`]
//! that the binary and the integration tests drive the same way.

mod connection;
mod state;

pub use connection::{ConnectionContext, ConnectionOutcome, handle_connection, reject_connection};
pub use state::{AppState, Registration};

use crate::config::Config;
use crate::diagnostics::run_diagnostic_server;
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use lifo_core::{AdmissionDecision, ConnectionRecord, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Accept loop for the app listener
pub async fn run(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    info!(
        target: "lifo::server",
        addr = ?listener.local_addr().ok(),
        max_connections = state.admission.config().max_connections,
        max_stack_size = state.stack.capacity(),
        "Listening for connections"
    );

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        // Responses are one or two small writes; send them immediately.
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(target: "lifo::server", peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        accept_connection(stream, addr, &state)?;
                    }
                    Err(e) => {
                        error!(target: "lifo::server", error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(target: "lifo::server", "Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!(target: "lifo::server", "App listener closed");
    Ok(())
}

/// Register, admit and spawn a task for one accepted socket.
///
/// Runs on the accept loop so admission decisions are made one at a time.
/// Only registry failures propagate; they end the accept loop.
fn accept_connection(stream: TcpStream, addr: SocketAddr, state: &Arc<AppState>) -> Result<()> {
    let sequence = state.next_sequence();
    let record = ConnectionRecord::new(sequence, Instant::now());
    let id = record.id;
    let handle = record.handle.clone();

    state.registry.insert(record.clone())?;
    let registration = Registration::new(Arc::clone(state), id);

    let now = Instant::now();
    let decision = state.admission.admit(&state.registry, &record, now)?;

    trace!(
        target: "lifo::server",
        peer = %addr,
        conn_id = %id,
        seq = sequence,
        decision = ?decision,
        "Connection accepted"
    );

    if let AdmissionDecision::Evicted { victim, .. } = decision {
        if let Some(victim) = state.registry.get(victim)? {
            debug!(
                target: "lifo::server",
                victim = %victim.id,
                victim_seq = victim.sequence,
                victim_age_ms = victim.age(now).as_millis() as u64,
                newcomer_seq = sequence,
                "Victim marked for disconnect"
            );
        }
    }

    if !decision.is_admitted() {
        tokio::spawn(async move {
            if let Err(e) = reject_connection(stream).await {
                debug!(target: "lifo::server", peer = %addr, conn_id = %registration.id(), error = %e, "Rejection not delivered");
            }
            drop(registration);
        });
        return Ok(());
    }

    let ctx = ConnectionContext {
        id,
        sequence,
        handle,
        state: Arc::clone(state),
    };
    tokio::spawn(async move {
        let conn_id = registration.id();
        match handle_connection(stream, ctx).await {
            Ok(outcome) => {
                trace!(target: "lifo::server", peer = %addr, conn_id = %conn_id, seq = sequence, outcome = ?outcome, "Connection finished");
            },
            Err(e) if e.is_transport_fault() => {
                debug!(target: "lifo::server", peer = %addr, conn_id = %conn_id, seq = sequence, error = %e, "Connection closed");
            },
            Err(e) => {
                warn!(target: "lifo::server", peer = %addr, conn_id = %conn_id, seq = sequence, error = %e, "Connection failed");
            },
        }
        drop(registration);
    });

    Ok(())
}

/// Both listeners, bound but not yet serving
pub struct BoundListeners {
    pub app: TcpListener,
    pub diagnostic: TcpListener,
}

impl BoundListeners {
    /// Bind both addresses. Failure here is fatal for startup.
    pub async fn bind(config: &Config) -> Result<Self> {
        let app = TcpListener::bind(config.listen_addr).await?;
        let diagnostic = TcpListener::bind(config.diagnostic_addr).await?;
        Ok(Self { app, diagnostic })
    }
}

/// Handle to a started server
pub struct RunningServer {
    state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
    app_task: Option<JoinHandle<Result<()>>>,
    diagnostic_task: Option<JoinHandle<Result<()>>>,
    app_addr: SocketAddr,
    diagnostic_addr: SocketAddr,
}

/// Bind both listeners and start serving.
pub async fn start(config: &Config) -> Result<RunningServer> {
    config.validate()?;
    let listeners = BoundListeners::bind(config).await?;
    let state = Arc::new(AppState::new(config));
    start_with(listeners, state)
}

/// Start serving on already bound listeners.
pub fn start_with(listeners: BoundListeners, state: Arc<AppState>) -> Result<RunningServer> {
    let app_addr = listeners.app.local_addr()?;
    let diagnostic_addr = listeners.diagnostic.local_addr()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_task = tokio::spawn(run(
        listeners.app,
        Arc::clone(&state),
        shutdown_tx.subscribe(),
    ));
    let diagnostic_task = tokio::spawn(run_diagnostic_server(
        listeners.diagnostic,
        Arc::clone(&state),
        shutdown_tx.subscribe(),
    ));

    Ok(RunningServer {
        state,
        shutdown_tx,
        app_task: Some(app_task),
        diagnostic_task: Some(diagnostic_task),
        app_addr,
        diagnostic_addr,
    })
}

impl RunningServer {
    pub fn app_addr(&self) -> SocketAddr {
        self.app_addr
    }

    pub fn diagnostic_addr(&self) -> SocketAddr {
        self.diagnostic_addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Resolves if a listener task ends on its own, which only happens on an
    /// unrecoverable fault. Pending forever otherwise.
    pub async fn fault(&mut self) -> ShutdownReason {
        let (Some(app), Some(diagnostic)) = (self.app_task.as_mut(), self.diagnostic_task.as_mut())
        else {
            return std::future::pending().await;
        };

        let (name, result) = tokio::select! {
            result = app => {
                self.app_task = None;
                ("app", result)
            }
            result = diagnostic => {
                self.diagnostic_task = None;
                ("diagnostic", result)
            }
        };

        let detail = match result {
            Ok(Ok(())) => format!("{name} listener exited"),
            Ok(Err(e)) => format!("{name} listener failed: {e}"),
            Err(e) => format!("{name} listener task panicked: {e}"),
        };
        ShutdownReason::Fault(detail)
    }

    /// Run the shutdown sequence. Returns false if a listener did not close
    /// within the timeout.
    pub async fn shutdown(self, reason: ShutdownReason) -> bool {
        let mut coordinator = ShutdownCoordinator::new(Arc::clone(&self.state), self.shutdown_tx);
        let tasks = [self.app_task, self.diagnostic_task]
            .into_iter()
            .flatten()
            .collect();
        coordinator.execute(reason, tasks).await
    }
}
