use serde::{Deserialize, Serialize};

/// Aggregate counters served by the diagnostic endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub live_connections: u64,
    pub stack_depth: u64,
    pub total_connections_ever_accepted: u64,
}
