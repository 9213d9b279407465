//! # Refresh scheduling
//!
//! Trailing-edge debounce: a burst of refresh triggers produces one fetch,
//! fired after a quiet period measured from the last trigger. The deadline
//! is a field of this object, not a detached timer, so cancelling is just
//! clearing it.

use std::time::Duration;

use tokio::time::Instant;

use crate::identity::SessionIdentity;

pub struct RefreshScheduler {
    debounce: Duration,
    deadline: Option<Instant>,
}

impl RefreshScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the deadline at now + debounce. Re-triggering while
    /// pending replaces the previous deadline, so only the last trigger in
    /// a burst counts. No-ops for audiences that never see the rail.
    pub fn schedule(&mut self, identity: &SessionIdentity) {
        if !identity.eligible() {
            return;
        }
        self.deadline = Some(Instant::now() + self.debounce);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// The armed deadline, for the owner's select loop. Falls back to now
    /// when idle; callers must pair it with [`is_pending`](Self::is_pending).
    pub fn deadline(&self) -> Instant {
        self.deadline.unwrap_or_else(Instant::now)
    }

    /// Disarm on fire; the owner runs the refresh.
    pub fn fire(&mut self) {
        self.deadline = None;
    }
}
