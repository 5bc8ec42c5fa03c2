//! Recording status LED.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::InterruptibleClock;
use crate::gpio::{Gpio, Level};
use crate::state::SupervisorState;

/// Blinks the status LED while recording, holds it low otherwise.
#[derive(Debug)]
pub struct StatusIndicator {
    gpio: Arc<dyn Gpio>,
    pin: u32,
    blink: Duration,
    idle: Duration,
    state: Arc<SupervisorState>,
    clock: InterruptibleClock,
}

impl StatusIndicator {
    /// Create an indicator on `pin`. `blink` is the half-period while
    /// recording, `idle` the re-check interval otherwise.
    #[must_use]
    pub fn new(
        gpio: Arc<dyn Gpio>,
        pin: u32,
        blink: Duration,
        idle: Duration,
        state: Arc<SupervisorState>,
        clock: InterruptibleClock,
    ) -> Self {
        Self {
            gpio,
            pin,
            blink,
            idle,
            state,
            clock,
        }
    }

    /// Drive the LED until shutdown, then leave it off.
    pub fn run(&self) {
        info!(pin = self.pin, "status indicator started");

        while !self.clock.is_shutdown() {
            if self.state.is_recording() {
                self.set(Level::High);
                self.clock.sleep(self.blink);
                self.set(Level::Low);
                self.clock.sleep(self.blink);
            } else {
                self.set(Level::Low);
                self.clock.sleep(self.idle);
            }
        }

        self.set(Level::Low);
        info!("status indicator stopped");
    }

    fn set(&self, level: Level) {
        if let Err(e) = self.gpio.write_pin(self.pin, level) {
            debug!(error = %e, %level, "failed to drive status led");
        }
    }
}
