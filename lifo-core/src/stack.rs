//! Bounded LIFO stack shared by every connection.
//!
//! Push waits while the stack is full and pop waits while it is empty. Both
//! wake on the complementary transition or give up when the [`HaltFlag`] is
//! set. Waiting is notification driven; nothing polls.

use crate::error::{LifoError, Result};
use crate::halt::HaltFlag;
use crate::payload::Payload;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

pub struct BoundedStack {
    items: Mutex<Vec<Payload>>,
    capacity: usize,
    /// Mirror of `items.len()` for lock-free diagnostics
    depth: AtomicUsize,
    not_full: Notify,
    not_empty: Notify,
    halt: Arc<HaltFlag>,
}

impl BoundedStack {
    /// Create a stack holding at most `capacity` payloads.
    ///
    /// A zero capacity is raised to one so that pushes can make progress.
    #[must_use]
    pub fn new(capacity: usize, halt: Arc<HaltFlag>) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            depth: AtomicUsize::new(0),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            halt,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the current depth. Not synchronized with in-flight
    /// pushes and pops.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Payload>>> {
        self.items
            .lock()
            .map_err(|_| LifoError::LockPoisoned("stack"))
    }

    /// Push `payload` on top, waiting for room if the stack is full.
    ///
    /// Returns [`LifoError::Halted`] if the halt flag is set before room
    /// becomes available; the payload is then discarded.
    pub async fn push(&self, payload: Payload) -> Result<()> {
        loop {
            let room = self.not_full.notified();
            tokio::pin!(room);
            room.as_mut().enable();

            if self.halt.is_halted() {
                return Err(LifoError::Halted);
            }

            {
                let mut items = self.lock()?;
                if items.len() < self.capacity {
                    items.push(payload);
                    self.depth.store(items.len(), Ordering::Relaxed);
                    trace!(target: "lifo::stack", depth = items.len(), "Pushed");
                    drop(items);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                () = &mut room => {},
                () = self.halt.halted() => return Err(LifoError::Halted),
            }
        }
    }

    /// Pop the most recently pushed payload, waiting for one if the stack is
    /// empty.
    pub async fn pop(&self) -> Result<Payload> {
        loop {
            let data = self.not_empty.notified();
            tokio::pin!(data);
            data.as_mut().enable();

            if self.halt.is_halted() {
                return Err(LifoError::Halted);
            }

            {
                let mut items = self.lock()?;
                if let Some(payload) = items.pop() {
                    self.depth.store(items.len(), Ordering::Relaxed);
                    trace!(target: "lifo::stack", depth = items.len(), "Popped");
                    drop(items);
                    self.not_full.notify_one();
                    return Ok(payload);
                }
            }

            tokio::select! {
                () = &mut data => {},
                () = self.halt.halted() => return Err(LifoError::Halted),
            }
        }
    }
}

impl std::fmt::Debug for BoundedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStack")
            .field("capacity", &self.capacity)
            .field("depth", &self.len())
            .finish_non_exhaustive()
    }
}
