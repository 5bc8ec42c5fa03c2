//! Process-wide supervisor state.
//!
//! All fields live behind a single mutex so a reader never observes a
//! recorded pid paired with a stale recording flag. The paired condvar is
//! what the interruptible clock waits on.

use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    recording: bool,
    child_pid: Option<u32>,
    shutdown_requested: bool,
}

/// A consistent copy of the supervisor state taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    /// Whether a recorder child is believed to be running.
    pub recording: bool,
    /// Pid of the live child, if any.
    pub child_pid: Option<u32>,
    /// Whether shutdown has been requested.
    pub shutdown_requested: bool,
}

/// Shared state owned by the daemon and handed to every component.
///
/// Write discipline: the process supervisor owns `child_pid` and
/// `recording`; the shutdown coordinator owns `shutdown_requested` and clears
/// `recording` when it fires.
#[derive(Debug, Default)]
pub struct SupervisorState {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl SupervisorState {
    /// Create a fresh state: not recording, no child, no shutdown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking loop must not take the rest of the supervisor with it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a consistent snapshot of all fields.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            recording: inner.recording,
            child_pid: inner.child_pid,
            shutdown_requested: inner.shutdown_requested,
        }
    }

    /// Whether a recorder child is currently running.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.lock().shutdown_requested
    }

    /// Record a freshly spawned child.
    pub(crate) fn record_spawn(&self, pid: u32) {
        let mut inner = self.lock();
        inner.child_pid = Some(pid);
        inner.recording = !inner.shutdown_requested;
    }

    /// Poll for child exit and clear the recorded pid in the same critical
    /// section, so nobody can act on a pid that has already been reaped.
    pub(crate) fn reap_with<T>(
        &self,
        poll: impl FnOnce() -> io::Result<Option<T>>,
    ) -> io::Result<Option<T>> {
        let mut inner = self.lock();
        let status = poll()?;
        if status.is_some() {
            inner.child_pid = None;
            inner.recording = false;
        }
        Ok(status)
    }

    /// Run `f` with the recorded child pid while holding the lock.
    pub(crate) fn with_child<R>(&self, f: impl FnOnce(Option<u32>) -> R) -> R {
        let inner = self.lock();
        f(inner.child_pid)
    }

    /// Flag shutdown and wake every waiter. Returns `false` if it was
    /// already flagged.
    pub(crate) fn request_shutdown(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.shutdown_requested {
                return false;
            }
            inner.recording = false;
            inner.shutdown_requested = true;
        }
        self.wake.notify_all();
        true
    }

    /// Block for up to `timeout` or until shutdown is flagged.
    ///
    /// Returns `true` when the full timeout elapsed.
    pub(crate) fn wait_unless_shutdown(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, result) = self
            .wake
            .wait_timeout_while(guard, timeout, |inner| !inner.shutdown_requested)
            .unwrap_or_else(PoisonError::into_inner);
        result.timed_out() && !guard.shutdown_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = SupervisorState::new();
        assert_eq!(state.snapshot(), StateSnapshot::default());
        assert!(!state.is_recording());
        assert!(!state.is_shutdown_requested());
    }

    #[test]
    fn test_record_spawn_sets_pid_and_recording() {
        let state = SupervisorState::new();
        state.record_spawn(1234);

        let snap = state.snapshot();
        assert_eq!(snap.child_pid, Some(1234));
        assert!(snap.recording);
    }

    #[test]
    fn test_record_spawn_after_shutdown_does_not_record() {
        let state = SupervisorState::new();
        state.request_shutdown();
        state.record_spawn(77);

        let snap = state.snapshot();
        assert_eq!(snap.child_pid, Some(77));
        assert!(!snap.recording);
    }

    #[test]
    fn test_reap_clears_on_exit() {
        let state = SupervisorState::new();
        state.record_spawn(10);

        let still_running = state.reap_with(|| Ok(None::<i32>)).unwrap();
        assert!(still_running.is_none());
        assert_eq!(state.snapshot().child_pid, Some(10));

        let exited = state.reap_with(|| Ok(Some(0))).unwrap();
        assert_eq!(exited, Some(0));
        let snap = state.snapshot();
        assert_eq!(snap.child_pid, None);
        assert!(!snap.recording);
    }

    #[test]
    fn test_reap_error_keeps_pid() {
        let state = SupervisorState::new();
        state.record_spawn(10);

        let result = state.reap_with(|| Err::<Option<()>, _>(io::Error::other("boom")));
        assert!(result.is_err());
        assert_eq!(state.snapshot().child_pid, Some(10));
    }

    #[test]
    fn test_with_child_sees_pid() {
        let state = SupervisorState::new();
        assert_eq!(state.with_child(|pid| pid), None);
        state.record_spawn(5);
        assert_eq!(state.with_child(|pid| pid), Some(5));
    }

    #[test]
    fn test_request_shutdown_is_idempotent() {
        let state = SupervisorState::new();
        state.record_spawn(5);

        assert!(state.request_shutdown());
        assert!(!state.request_shutdown());

        let snap = state.snapshot();
        assert!(snap.shutdown_requested);
        assert!(!snap.recording);
        // The child is left alone.
        assert_eq!(snap.child_pid, Some(5));
    }

    #[test]
    fn test_wait_times_out_without_shutdown() {
        let state = SupervisorState::new();
        assert!(state.wait_unless_shutdown(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_returns_immediately_after_shutdown() {
        let state = SupervisorState::new();
        state.request_shutdown();
        assert!(!state.wait_unless_shutdown(Duration::from_secs(60)));
    }
}
