//! Process-wide halt signal.
//!
//! Set once by the shutdown path. Every task blocked on the stack observes it
//! and abandons its operation without completing it.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
pub struct HaltFlag {
    halted: AtomicBool,
    notify: Notify,
}

impl HaltFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Returns false if it was already set.
    pub fn trigger(&self) -> bool {
        let first = !self.halted.swap(true, Ordering::SeqCst);
        if first {
            info!(target: "lifo::shutdown", "Halt flag set");
        }
        self.notify.notify_waiters();
        first
    }

    #[inline]
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set. Returns immediately if it already is.
    pub async fn halted(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_halted() {
                return;
            }
            notified.await;
        }
    }
}
