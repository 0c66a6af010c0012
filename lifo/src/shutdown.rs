//! Shutdown handling for the lifo server.
//!
//! The sequence, run once on a termination signal or an unrecoverable fault:
//! 1. Log a final diagnostic snapshot
//! 2. Set the halt flag; blocked pushes and pops abandon without a response
//! 3. Tell both listeners to stop accepting
//! 4. Wait for the listener tasks to finish, bounded by a timeout
//!
//! The stack is neither drained nor persisted.

use crate::server::AppState;
use lifo_core::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Upper bound on waiting for listeners to report closed
pub const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(unix)]
#[allow(clippy::expect_used)] // Signal handlers are startup-critical; abort is correct on failure
pub fn install_signal_handlers() -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "lifo::shutdown", "SIGTERM received, initiating shutdown");
            }
            _ = sigint.recv() => {
                info!(target: "lifo::shutdown", "SIGINT received, initiating shutdown");
            }
        }
    }
}

#[cfg(windows)]
pub async fn install_signal_handlers() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "lifo::shutdown", error = %e, "Failed to listen for Ctrl+C");
        return std::future::pending().await;
    }

    info!(target: "lifo::shutdown", "Ctrl+C received, initiating shutdown");
}

/// What started the shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Fault(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "termination signal"),
            Self::Fault(detail) => write!(f, "fault: {}", detail),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving normally
    Running,
    /// Logging final diagnostics
    FinalSnapshot,
    /// Halt flag set, waiters abandoning
    Halting,
    /// Waiting for listeners to close
    ClosingListeners,
    /// Shutdown complete
    Complete,
}

pub struct ShutdownCoordinator {
    state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
    phase: ShutdownPhase,
}

impl ShutdownCoordinator {
    pub fn new(state: Arc<AppState>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_timeout(state, shutdown_tx, LISTENER_CLOSE_TIMEOUT)
    }

    pub fn with_timeout(
        state: Arc<AppState>,
        shutdown_tx: broadcast::Sender<()>,
        timeout: Duration,
    ) -> Self {
        Self {
            state,
            shutdown_tx,
            timeout,
            phase: ShutdownPhase::Running,
        }
    }

    /// Get the current shutdown phase
    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// Execute the shutdown sequence.
    ///
    /// Returns true if every listener task finished within the timeout.
    pub async fn execute(
        &mut self,
        reason: ShutdownReason,
        listeners: Vec<JoinHandle<Result<()>>>,
    ) -> bool {
        let start = std::time::Instant::now();

        self.phase = ShutdownPhase::FinalSnapshot;
        let snapshot = self.state.snapshot();
        info!(
            target: "lifo::shutdown",
            reason = %reason,
            live_connections = snapshot.live_connections,
            stack_depth = snapshot.stack_depth,
            total_connections = snapshot.total_connections_ever_accepted,
            "Final diagnostics"
        );

        self.phase = ShutdownPhase::Halting;
        self.state.halt.trigger();

        self.phase = ShutdownPhase::ClosingListeners;
        // Err only means every listener has already gone.
        let _ = self.shutdown_tx.send(());

        let mut clean = true;
        for handle in listeners {
            match tokio::time::timeout(self.timeout, handle).await {
                Ok(Ok(Ok(()))) => {},
                Ok(Ok(Err(e))) => {
                    warn!(target: "lifo::shutdown", error = %e, "Listener exited with error");
                },
                Ok(Err(e)) => {
                    warn!(target: "lifo::shutdown", error = %e, "Listener task panicked");
                },
                Err(_) => {
                    warn!(
                        target: "lifo::shutdown",
                        timeout_secs = self.timeout.as_secs(),
                        "Listener did not close in time"
                    );
                    clean = false;
                },
            }
        }

        self.phase = ShutdownPhase::Complete;
        info!(
            target: "lifo::shutdown",
            elapsed_ms = start.elapsed().as_millis() as u64,
            clean,
            "Shutdown sequence complete"
        );

        clean
    }
}
