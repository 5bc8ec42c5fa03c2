//! Ignition monitoring.
//!
//! While ignition is present the keep-alive output is held high so the
//! external power latch stays closed. When ignition drops and stays down for
//! the debounce window, the recorder is asked to stop with SIGTERM so it can
//! close the file it is writing before the latch releases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::InterruptibleClock;
use crate::gpio::{Gpio, Level};
use crate::state::SupervisorState;
use crate::supervisor::terminate_child;

/// Pins used by the power monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerPins {
    /// Ignition-sense input; high while the vehicle has power.
    pub ignition: u32,
    /// Keep-alive output.
    pub keep_alive: u32,
}

/// Timing for the power monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTiming {
    /// Ignition poll interval.
    pub poll_interval: Duration,
    /// How long ignition must stay off before acting.
    pub debounce: Duration,
    /// Pause after handling an ignition-off reading.
    pub holdoff: Duration,
}

impl Default for PowerTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(2),
            holdoff: Duration::from_secs(2),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// Ignition on; keep-alive asserted.
    Present,
    /// Ignition came back during the debounce window.
    Recovered,
    /// Ignition off but no recorder to stop.
    LostNoChild,
    /// Ignition off; SIGTERM sent to this pid.
    TerminationRequested(u32),
    /// Ignition off; the signal could not be delivered.
    TerminationFailed,
    /// Shutdown arrived during the debounce window.
    Interrupted,
}

/// Watches ignition and stops the recorder on power loss.
#[derive(Debug)]
pub struct PowerMonitor {
    gpio: Arc<dyn Gpio>,
    pins: PowerPins,
    timing: PowerTiming,
    state: Arc<SupervisorState>,
    clock: InterruptibleClock,
    terminations: AtomicU64,
}

impl PowerMonitor {
    /// Create a power monitor.
    #[must_use]
    pub fn new(
        gpio: Arc<dyn Gpio>,
        pins: PowerPins,
        timing: PowerTiming,
        state: Arc<SupervisorState>,
        clock: InterruptibleClock,
    ) -> Self {
        Self {
            gpio,
            pins,
            timing,
            state,
            clock,
            terminations: AtomicU64::new(0),
        }
    }

    /// Number of termination requests sent so far.
    #[must_use]
    pub fn terminations_sent(&self) -> u64 {
        self.terminations.load(Ordering::Relaxed)
    }

    /// Poll ignition until shutdown is requested.
    pub fn run(&self) {
        info!(
            ignition_pin = self.pins.ignition,
            keep_alive_pin = self.pins.keep_alive,
            "power monitor started"
        );
        self.keep_alive();

        while !self.clock.is_shutdown() {
            self.tick();
            self.clock.sleep(self.timing.poll_interval);
        }

        info!("power monitor stopped");
    }

    /// One poll of the ignition input, including the debounce and holdoff
    /// waits when power is missing.
    pub fn tick(&self) -> PowerEvent {
        if self.power_present() {
            self.keep_alive();
            return PowerEvent::Present;
        }

        debug!("ignition off, debouncing");
        if !self.clock.sleep(self.timing.debounce) {
            return PowerEvent::Interrupted;
        }

        // Re-read rather than trusting the first sample.
        let event = if self.power_present() {
            info!("ignition restored within debounce window");
            PowerEvent::Recovered
        } else {
            match terminate_child(&self.state) {
                Ok(Some(pid)) => {
                    self.terminations.fetch_add(1, Ordering::Relaxed);
                    warn!(pid, "power lost, asked recorder to stop");
                    PowerEvent::TerminationRequested(pid)
                }
                Ok(None) => {
                    debug!("power lost, no recorder running");
                    PowerEvent::LostNoChild
                }
                Err(e) => {
                    warn!(error = %e, "power lost, failed to stop recorder");
                    PowerEvent::TerminationFailed
                }
            }
        };

        self.clock.sleep(self.timing.holdoff);
        event
    }

    fn power_present(&self) -> bool {
        match self.gpio.read_pin(self.pins.ignition) {
            Ok(level) => level.is_high(),
            Err(e) => {
                // Never stop a recording on a bad read.
                warn!(error = %e, "failed to read ignition, assuming power present");
                true
            }
        }
    }

    fn keep_alive(&self) {
        if let Err(e) = self.gpio.write_pin(self.pins.keep_alive, Level::High) {
            warn!(error = %e, "failed to assert keep-alive");
        }
    }
}
