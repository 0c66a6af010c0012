//! State shared by the app listener, its connection tasks and the diagnostic
//! listener.

use crate::config::Config;
use lifo_core::{
    AdmissionConfig, AdmissionController, BoundedStack, ConnectionId, ConnectionRegistry,
    DiagnosticSnapshot, HaltFlag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

pub struct AppState {
    pub stack: BoundedStack,
    pub registry: ConnectionRegistry,
    pub admission: AdmissionController,
    pub halt: Arc<HaltFlag>,
    pub idle_timeout: Option<Duration>,
    /// Last sequence number handed out; doubles as the lifetime accept count
    sequence: AtomicU64,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_limits(
            config.limits.max_stack_size,
            config.admission_config(),
            config.idle_timeout(),
        )
    }

    pub fn with_limits(
        max_stack_size: usize,
        admission: AdmissionConfig,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let halt = Arc::new(HaltFlag::new());
        Self {
            stack: BoundedStack::new(max_stack_size, Arc::clone(&halt)),
            registry: ConnectionRegistry::new(),
            admission: AdmissionController::new(admission),
            halt,
            idle_timeout,
            sequence: AtomicU64::new(0),
        }
    }

    /// Allocate the next accept sequence number, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_accepted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn live_connections(&self) -> usize {
        self.registry.count()
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            live_connections: self.live_connections() as u64,
            stack_depth: self.stack.len() as u64,
            total_connections_ever_accepted: self.total_accepted(),
        }
    }
}

/// Removes a connection from the registry when dropped, including when the
/// owning task panics or is aborted.
pub struct Registration {
    state: Arc<AppState>,
    id: ConnectionId,
}

impl Registration {
    pub fn new(state: Arc<AppState>, id: ConnectionId) -> Self {
        Self { state, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(e) = self.state.registry.remove(self.id) {
            warn!(
                target: "lifo::server",
                conn_id = %self.id,
                error = %e,
                "Failed to deregister connection"
            );
        }
    }
}
