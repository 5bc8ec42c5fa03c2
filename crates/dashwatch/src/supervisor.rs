//! Recorder process supervision.
//!
//! The supervisor keeps exactly one recorder child alive: spawn, poll for
//! exit, pause, respawn. It never kills the child itself; termination comes
//! from the power monitor through [`terminate_child`].

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{error, info, warn};

use crate::clock::InterruptibleClock;
use crate::error::{Error, Result};
use crate::state::SupervisorState;

/// Timing for the supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    /// How often the child is polled for exit.
    pub poll_interval: Duration,
    /// Pause after an exit before respawning.
    pub restart_delay: Duration,
    /// Pause after a failed spawn.
    pub spawn_backoff: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
            spawn_backoff: Duration::from_secs(5),
        }
    }
}

/// A spawned recorder, valid until its exit has been reaped.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    running: bool,
}

impl ChildHandle {
    fn new(child: Child) -> Self {
        Self {
            child,
            running: true,
        }
    }

    /// Process id of the child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the child has not been reaped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Non-blocking exit check. Reaping and clearing the shared pid happen
    /// under one lock.
    fn poll_exit(&mut self, state: &SupervisorState) -> std::io::Result<Option<ExitStatus>> {
        let status = state.reap_with(|| self.child.try_wait())?;
        if status.is_some() {
            self.running = false;
        }
        Ok(status)
    }
}

/// Keeps the recorder running until shutdown.
#[derive(Debug)]
pub struct ProcessSupervisor {
    executable: PathBuf,
    timing: SupervisorTiming,
    state: Arc<SupervisorState>,
    clock: InterruptibleClock,
}

impl ProcessSupervisor {
    /// Create a supervisor for `executable`.
    #[must_use]
    pub fn new(
        executable: impl AsRef<Path>,
        timing: SupervisorTiming,
        state: Arc<SupervisorState>,
        clock: InterruptibleClock,
    ) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            timing,
            state,
            clock,
        }
    }

    /// Supervise until shutdown is requested.
    ///
    /// A child still running at shutdown is left alone.
    pub fn run(&self) {
        info!(executable = %self.executable.display(), "process supervisor started");

        while !self.clock.is_shutdown() {
            let mut child = match self.spawn() {
                Ok(child) => child,
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in = ?self.timing.spawn_backoff,
                        "failed to start recorder"
                    );
                    self.clock.sleep(self.timing.spawn_backoff);
                    continue;
                }
            };

            let Some(status) = self.watch(&mut child) else {
                info!(pid = child.pid(), "shutdown requested, leaving recorder running");
                break;
            };

            if status.success() {
                info!(pid = child.pid(), %status, "recorder exited");
            } else {
                warn!(pid = child.pid(), %status, "recorder exited");
            }
            self.clock.sleep(self.timing.restart_delay);
        }

        info!("process supervisor stopped");
    }

    fn spawn(&self) -> Result<ChildHandle> {
        let child = Command::new(&self.executable)
            .spawn()
            .map_err(|source| Error::Spawn {
                path: self.executable.clone(),
                source,
            })?;

        let handle = ChildHandle::new(child);
        self.state.record_spawn(handle.pid());
        info!(pid = handle.pid(), "recorder started");
        Ok(handle)
    }

    /// Poll until the child exits (`Some`) or shutdown is requested (`None`).
    fn watch(&self, child: &mut ChildHandle) -> Option<ExitStatus> {
        loop {
            match child.poll_exit(&self.state) {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => error!(pid = child.pid(), error = %e, "failed to poll recorder"),
            }
            if !self.clock.sleep(self.timing.poll_interval) {
                return None;
            }
        }
    }
}

/// Ask the recorded child, if any, to terminate gracefully with SIGTERM.
///
/// The signal is sent while holding the state lock, so the pid cannot have
/// been reaped in the meantime. Returns the pid that was signalled.
///
/// # Errors
///
/// Returns [`Error::Signal`] if the signal cannot be delivered.
pub fn terminate_child(state: &SupervisorState) -> Result<Option<u32>> {
    state.with_child(|pid| {
        let Some(pid) = pid else {
            return Ok(None);
        };
        let raw = i32::try_from(pid).map_err(|_| Error::internal(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|source| Error::Signal { pid, source })?;
        Ok(Some(pid))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::thread;
    use std::time::Instant;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fast_timing() -> SupervisorTiming {
        SupervisorTiming {
            poll_interval: Duration::from_millis(10),
            restart_delay: Duration::from_millis(50),
            // Short so a spurious ETXTBSY on a fresh script just retries
            spawn_backoff: Duration::from_millis(20),
        }
    }

    fn supervisor(executable: &Path, state: &Arc<SupervisorState>) -> ProcessSupervisor {
        supervisor_with(executable, fast_timing(), state)
    }

    fn supervisor_with(
        executable: &Path,
        timing: SupervisorTiming,
        state: &Arc<SupervisorState>,
    ) -> ProcessSupervisor {
        crate::logging::init_test_logging();
        ProcessSupervisor::new(
            executable,
            timing,
            Arc::clone(state),
            InterruptibleClock::new(Arc::clone(state)),
        )
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn process_alive(pid: u32) -> bool {
        kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok()
    }

    #[test]
    fn test_respawns_after_restart_delay() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs.log");
        // Each run logs its start time in nanoseconds.
        let script = write_script(
            dir.path(),
            "failing.sh",
            &format!("date +%s%N >> {}\nexit 3", log.display()),
        );

        let timing = SupervisorTiming {
            restart_delay: Duration::from_millis(200),
            ..fast_timing()
        };
        let state = Arc::new(SupervisorState::new());
        let supervisor = supervisor_with(&script, timing, &state);
        let worker = thread::spawn(move || supervisor.run());

        let starts = || -> Vec<u128> {
            fs::read_to_string(&log)
                .map(|s| s.lines().filter_map(|l| l.trim().parse().ok()).collect())
                .unwrap_or_default()
        };
        assert!(wait_until(Duration::from_secs(5), || starts().len() >= 3));

        state.request_shutdown();
        worker.join().unwrap();

        let starts = starts();
        let min_gap = timing.restart_delay.as_nanos();
        for pair in starts.windows(2) {
            let gap = pair[1].saturating_sub(pair[0]);
            assert!(gap >= min_gap, "respawned after {gap}ns: {starts:?}");
        }
    }

    #[test]
    fn test_spawn_failure_is_retried_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-recorder");

        let timing = SupervisorTiming {
            spawn_backoff: Duration::from_millis(300),
            ..fast_timing()
        };
        let state = Arc::new(SupervisorState::new());
        let supervisor = supervisor_with(&missing, timing, &state);
        let start = Instant::now();
        let worker = thread::spawn(move || supervisor.run());

        thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished());
        assert_eq!(state.snapshot().child_pid, None);
        assert!(!state.is_recording());

        // Once the executable appears the next retry picks it up, but not
        // before the backoff after the first failure has passed.
        write_script(dir.path(), "no-such-recorder", "exec sleep 30");
        assert!(wait_until(Duration::from_secs(5), || state.is_recording()));
        assert!(start.elapsed() >= timing.spawn_backoff);

        let pid = state.snapshot().child_pid.unwrap();
        state.request_shutdown();
        worker.join().unwrap();
        kill(Pid::from_raw(i32::try_from(pid).unwrap()), Signal::SIGKILL).unwrap();
    }

    #[test]
    fn test_records_pid_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "rec.sh", "exec sleep 30");

        let state = Arc::new(SupervisorState::new());
        let supervisor = supervisor(&script, &state);
        let worker = thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(5), || state.is_recording()));
        let snap = state.snapshot();
        let pid = snap.child_pid.unwrap();
        assert!(process_alive(pid));

        // Terminate; the supervisor reaps, clears and starts a new child.
        assert_eq!(terminate_child(&state).unwrap(), Some(pid));
        assert!(wait_until(Duration::from_secs(5), || {
            state.snapshot().child_pid.is_some_and(|p| p != pid)
        }));

        let replacement = state.snapshot().child_pid.unwrap();
        state.request_shutdown();
        worker.join().unwrap();
        kill(Pid::from_raw(i32::try_from(replacement).unwrap()), Signal::SIGKILL).unwrap();
    }

    #[test]
    fn test_never_more_than_one_child() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("live.log");
        // Each instance logs start and end; a live overlap would show two
        // starts in a row.
        let script = write_script(
            dir.path(),
            "short.sh",
            &format!(
                "echo start >> {log}\nsleep 0.05\necho end >> {log}",
                log = log.display()
            ),
        );

        let state = Arc::new(SupervisorState::new());
        let supervisor = supervisor(&script, &state);
        let worker = thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(10), || {
            fs::read_to_string(&log).map(|s| s.matches("end").count() >= 3).unwrap_or(false)
        }));
        state.request_shutdown();
        worker.join().unwrap();
        thread::sleep(Duration::from_millis(100));

        let contents = fs::read_to_string(&log).unwrap();
        let mut live = 0;
        for line in contents.lines() {
            match line {
                "start" => live += 1,
                "end" => live -= 1,
                _ => {}
            }
            assert!(live <= 1, "overlapping recorders: {contents}");
        }
    }

    #[test]
    fn test_shutdown_leaves_child_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "rec.sh", "exec sleep 30");

        let state = Arc::new(SupervisorState::new());
        let supervisor = supervisor(&script, &state);
        let worker = thread::spawn(move || supervisor.run());

        assert!(wait_until(Duration::from_secs(5), || state.is_recording()));
        let pid = state.snapshot().child_pid.unwrap();

        let start = Instant::now();
        state.request_shutdown();
        worker.join().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(process_alive(pid));
        assert!(!state.is_recording());

        let pid = Pid::from_raw(i32::try_from(pid).unwrap());
        kill(pid, Signal::SIGKILL).unwrap();
        let _ = nix::sys::wait::waitpid(pid, None);
    }

    #[test]
    fn test_terminate_without_child() {
        let state = SupervisorState::new();
        assert_eq!(terminate_child(&state).unwrap(), None);
    }

    #[test]
    fn test_terminate_sends_sigterm() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let state = SupervisorState::new();
        state.record_spawn(child.id());

        assert_eq!(terminate_child(&state).unwrap(), Some(child.id()));
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_child_handle_reaps() {
        let child = Command::new("true").spawn().unwrap();
        let state = SupervisorState::new();
        let mut handle = ChildHandle::new(child);
        state.record_spawn(handle.pid());
        assert!(handle.is_running());

        assert!(wait_until(Duration::from_secs(5), || {
            handle.poll_exit(&state).unwrap().is_some()
        }));
        assert!(!handle.is_running());
        assert_eq!(state.snapshot().child_pid, None);
    }
}
