//! Registry of live client connections.
//!
//! Each record carries a [`DisconnectHandle`] shared with the connection's
//! task, which lets the admission path force a connection closed from the
//! outside.

use crate::error::{LifoError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Globally unique connection identity, stable for the connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Default)]
struct DisconnectInner {
    pending: AtomicBool,
    notify: Notify,
}

/// Shared pending-disconnect flag plus wakeup for the owning task.
#[derive(Debug, Clone, Default)]
pub struct DisconnectHandle {
    inner: Arc<DisconnectInner>,
}

impl DisconnectHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag false to true and wake the owning task.
    ///
    /// Only the first call performs the transition and returns true.
    pub fn request(&self) -> bool {
        let first = !self.inner.pending.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once a disconnect has been requested.
    pub async fn requested(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_pending() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub admitted_at: Instant,
    /// Human readable accept counter, starting at 1
    pub sequence: u64,
    pub handle: DisconnectHandle,
}

impl ConnectionRecord {
    #[must_use]
    pub fn new(sequence: u64, admitted_at: Instant) -> Self {
        Self {
            id: ConnectionId::generate(),
            admitted_at,
            sequence,
            handle: DisconnectHandle::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn pending_disconnect(&self) -> bool {
        self.handle.is_pending()
    }

    /// Age of the connection at `now`. Zero if `now` precedes admission.
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.admitted_at)
    }
}

/// Map of live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionRecord>>> {
        self.records
            .read()
            .map_err(|_| LifoError::LockPoisoned("registry"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionRecord>>> {
        self.records
            .write()
            .map_err(|_| LifoError::LockPoisoned("registry"))
    }

    pub fn insert(&self, record: ConnectionRecord) -> Result<()> {
        let mut records = self.write()?;
        debug!(
            target: "lifo::registry",
            conn_id = %record.id,
            seq = record.sequence,
            live = records.len() + 1,
            "Connection registered"
        );
        records.insert(record.id, record);
        Ok(())
    }

    pub fn remove(&self, id: ConnectionId) -> Result<Option<ConnectionRecord>> {
        let mut records = self.write()?;
        let removed = records.remove(&id);
        if let Some(record) = &removed {
            debug!(
                target: "lifo::registry",
                conn_id = %id,
                seq = record.sequence,
                live = records.len(),
                "Connection deregistered"
            );
        }
        Ok(removed)
    }

    pub fn get(&self, id: ConnectionId) -> Result<Option<ConnectionRecord>> {
        Ok(self.read()?.get(&id).cloned())
    }

    /// Number of live connections. Diagnostics tolerate a poisoned lock by
    /// reporting zero.
    #[must_use]
    pub fn count(&self) -> usize {
        self.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Live connections not already on their way out. A record marked
    /// pending disconnect stays registered until its task ends but no longer
    /// holds a slot.
    pub fn active_count(&self) -> Result<usize> {
        Ok(self
            .read()?
            .values()
            .filter(|r| !r.pending_disconnect())
            .count())
    }

    /// The active record admitted earliest, ignoring `excluding` and any
    /// record already pending disconnect.
    ///
    /// Ties on `admitted_at` go to the lower sequence number.
    pub fn oldest(&self, excluding: ConnectionId) -> Result<Option<ConnectionRecord>> {
        let records = self.read()?;
        Ok(records
            .values()
            .filter(|r| r.id != excluding && !r.pending_disconnect())
            .min_by_key(|r| (r.admitted_at, r.sequence))
            .cloned())
    }

    /// Mark `id` pending disconnect and wake its task.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn mark_pending_disconnect(&self, id: ConnectionId) -> Result<bool> {
        let records = self.read()?;
        Ok(records.get(&id).is_some_and(|r| r.handle.request()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let record = ConnectionRecord::new(1, Instant::now());
        let id = record.id;

        registry.insert(record).unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.active_count().unwrap(), 1);
        assert_eq!(registry.get(id).unwrap().unwrap().sequence, 1);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.unwrap().sequence, 1);
        assert_eq!(registry.count(), 0);
        assert!(registry.get(id).unwrap().is_none());
        assert!(registry.remove(id).unwrap().is_none());
    }

    #[test]
    fn test_oldest_excludes_and_orders() {
        let registry = ConnectionRegistry::new();
        let base = Instant::now();

        let first = ConnectionRecord::new(1, base);
        let second = ConnectionRecord::new(2, base + Duration::from_secs(1));
        let third = ConnectionRecord::new(3, base + Duration::from_secs(2));
        let (first_id, second_id, third_id) = (first.id, second.id, third.id);

        registry.insert(third).unwrap();
        registry.insert(first).unwrap();
        registry.insert(second).unwrap();

        assert_eq!(registry.oldest(third_id).unwrap().unwrap().id, first_id);
        assert_eq!(registry.oldest(first_id).unwrap().unwrap().id, second_id);
    }

    #[test]
    fn test_oldest_tie_breaks_on_sequence() {
        let registry = ConnectionRegistry::new();
        let at = Instant::now();
        let a = ConnectionRecord::new(7, at);
        let b = ConnectionRecord::new(3, at);
        let b_id = b.id;

        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        let newcomer = ConnectionId::generate();
        assert_eq!(registry.oldest(newcomer).unwrap().unwrap().id, b_id);
    }

    #[test]
    fn test_oldest_with_only_excluded() {
        let registry = ConnectionRegistry::new();
        let only = ConnectionRecord::new(1, Instant::now());
        let id = only.id;
        registry.insert(only).unwrap();

        assert!(registry.oldest(id).unwrap().is_none());
    }

    #[test]
    fn test_pending_disconnect_transitions_once() {
        let registry = ConnectionRegistry::new();
        let record = ConnectionRecord::new(1, Instant::now());
        let id = record.id;
        let handle = record.handle.clone();
        registry.insert(record).unwrap();

        assert!(!handle.is_pending());
        assert!(registry.mark_pending_disconnect(id).unwrap());
        assert!(handle.is_pending());
        assert!(!registry.mark_pending_disconnect(id).unwrap());
        assert!(registry.remove(id).unwrap().unwrap().pending_disconnect());

        assert!(!registry.mark_pending_disconnect(ConnectionId::generate()).unwrap());
    }

    #[test]
    fn test_pending_records_hold_no_slot() {
        let registry = ConnectionRegistry::new();
        let base = Instant::now();
        let first = ConnectionRecord::new(1, base);
        let second = ConnectionRecord::new(2, base + Duration::from_secs(1));
        let (first_id, second_id) = (first.id, second.id);
        registry.insert(first).unwrap();
        registry.insert(second).unwrap();

        registry.mark_pending_disconnect(first_id).unwrap();

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.active_count().unwrap(), 1);

        let newcomer = ConnectionId::generate();
        assert_eq!(registry.oldest(newcomer).unwrap().unwrap().id, second_id);

        registry.mark_pending_disconnect(second_id).unwrap();
        assert!(registry.oldest(newcomer).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_handle_wakes_task() {
        let handle = DisconnectHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.requested().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        handle.request();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[test]
    fn test_record_age_saturates() {
        let now = Instant::now();
        let record = ConnectionRecord::new(1, now + Duration::from_secs(5));
        assert_eq!(record.age(now), Duration::ZERO);
        assert_eq!(
            record.age(now + Duration::from_secs(8)),
            Duration::from_secs(3)
        );
    }
}
