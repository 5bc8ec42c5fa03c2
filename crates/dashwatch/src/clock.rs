//! Interruptible sleeping.
//!
//! Every supervisor loop suspends only through [`InterruptibleClock::sleep`],
//! which is what lets all of them stop promptly once shutdown is flagged
//! instead of waiting out their poll interval.

use std::sync::Arc;
use std::time::Duration;

use crate::state::SupervisorState;

/// A sleep primitive that wakes early when shutdown is requested.
#[derive(Debug, Clone)]
pub struct InterruptibleClock {
    state: Arc<SupervisorState>,
}

impl InterruptibleClock {
    /// Create a clock bound to the shared supervisor state.
    #[must_use]
    pub fn new(state: Arc<SupervisorState>) -> Self {
        Self { state }
    }

    /// Sleep for up to `duration`.
    ///
    /// Returns `true` if the whole duration elapsed and `false` if shutdown
    /// cut the wait short (or had already been requested).
    pub fn sleep(&self, duration: Duration) -> bool {
        self.state.wait_unless_shutdown(duration)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown_requested()
    }
}
