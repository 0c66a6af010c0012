//! Admission control for new connections.
//!
//! A new connection is accepted while the live count stays within
//! `max_connections`. On overflow only the single oldest other connection is
//! considered: if it has outlived the stale period it is evicted to make
//! room, otherwise the newcomer is rejected.

use crate::error::Result;
use crate::registry::{ConnectionId, ConnectionRecord, ConnectionRegistry};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub max_connections: usize,
    pub stale_connection_period: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            stale_connection_period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Within capacity
    Accept,
    /// Accepted after forcing the given connection closed
    Evicted { victim: ConnectionId, victim_sequence: u64 },
    /// Over capacity and the oldest connection is not stale
    Reject,
}

impl AdmissionDecision {
    #[inline]
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Reject)
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
    config: AdmissionConfig,
}

impl AdmissionController {
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Decide the fate of `newcomer`, which must already be registered.
    ///
    /// On eviction the victim is marked pending disconnect and its task is
    /// woken to close the transport. From then on it holds no slot, so a
    /// later overflow picks the next oldest rather than the same victim.
    /// The newcomer's record is left in place whatever the outcome; the
    /// caller removes it on reject.
    pub fn admit(
        &self,
        registry: &ConnectionRegistry,
        newcomer: &ConnectionRecord,
        now: Instant,
    ) -> Result<AdmissionDecision> {
        let live = registry.active_count()?;
        if live <= self.config.max_connections {
            return Ok(AdmissionDecision::Accept);
        }

        let Some(oldest) = registry.oldest(newcomer.id)? else {
            // Registry holds only the newcomer, so max_connections is zero.
            debug!(
                target: "lifo::admission",
                conn_id = %newcomer.id,
                live,
                "No eviction candidate"
            );
            return Ok(AdmissionDecision::Reject);
        };

        let age = oldest.age(now);
        if age > self.config.stale_connection_period {
            if !registry.mark_pending_disconnect(oldest.id)? {
                // Deregistered since the lookup; its slot is already free.
                return Ok(AdmissionDecision::Accept);
            }
            info!(
                target: "lifo::admission",
                conn_id = %newcomer.id,
                seq = newcomer.sequence,
                victim = %oldest.id,
                victim_seq = oldest.sequence,
                victim_age_ms = age.as_millis() as u64,
                "Evicting stale connection"
            );
            Ok(AdmissionDecision::Evicted {
                victim: oldest.id,
                victim_sequence: oldest.sequence,
            })
        } else {
            debug!(
                target: "lifo::admission",
                conn_id = %newcomer.id,
                seq = newcomer.sequence,
                live,
                max = self.config.max_connections,
                oldest_age_ms = age.as_millis() as u64,
                "Rejecting connection"
            );
            Ok(AdmissionDecision::Reject)
        }
    }
}
