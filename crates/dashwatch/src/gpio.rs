//! GPIO abstraction.
//!
//! The supervisor only needs three logical pins: the ignition-sense input,
//! the keep-alive output and the recording LED. [`Gpio`] hides the physical
//! numbering and driver behind a small trait; the backends are the Linux
//! sysfs driver from `dashwatch-linux` and [`SimulatedGpio`], an in-memory
//! implementation with scripted inputs.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Logic low.
    Low,
    /// Logic high.
    High,
}

impl Level {
    /// Whether this level is high.
    #[must_use]
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// Digital input.
    Input,
    /// Digital output.
    Output,
}

/// Which GPIO driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    /// Linux `/sys/class/gpio`.
    #[default]
    Sysfs,
    /// In-memory pins, for bench runs without hardware.
    Simulated,
}

impl fmt::Display for GpioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sysfs => write!(f, "sysfs"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

/// Digital pin access.
pub trait Gpio: Send + Sync + fmt::Debug {
    /// Configure a pin's direction. Called once per pin at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be configured.
    fn configure(&self, pin: u32, mode: PinMode) -> Result<()>;

    /// Read the level of an input pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be read.
    fn read_pin(&self, pin: u32) -> Result<Level>;

    /// Drive an output pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    fn write_pin(&self, pin: u32, level: Level) -> Result<()>;
}

#[derive(Debug, Default)]
struct SimulatedPin {
    mode: Option<PinMode>,
    level: Option<Level>,
    scripted: VecDeque<Level>,
    writes: Vec<Level>,
}

/// In-memory GPIO.
///
/// Inputs can be given a fixed level or a script of levels consumed one per
/// read; once a script runs out the last scripted level sticks. Every write
/// is logged so tests can inspect what a component drove.
#[derive(Debug, Default)]
pub struct SimulatedGpio {
    pins: Mutex<HashMap<u32, SimulatedPin>>,
}

impl SimulatedGpio {
    /// Create a simulated GPIO with no configured pins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pins(&self) -> MutexGuard<'_, HashMap<u32, SimulatedPin>> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the level an input pin reports.
    pub fn set_input(&self, pin: u32, level: Level) {
        let mut pins = self.pins();
        let entry = pins.entry(pin).or_default();
        entry.scripted.clear();
        entry.level = Some(level);
    }

    /// Queue levels to be returned by successive reads.
    pub fn script_input(&self, pin: u32, levels: impl IntoIterator<Item = Level>) {
        self.pins()
            .entry(pin)
            .or_default()
            .scripted
            .extend(levels);
    }

    /// The level last written to or set on a pin.
    #[must_use]
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.pins().get(&pin).and_then(|p| p.level)
    }

    /// The mode a pin was configured with.
    #[must_use]
    pub fn mode(&self, pin: u32) -> Option<PinMode> {
        self.pins().get(&pin).and_then(|p| p.mode)
    }

    /// Every level written to a pin, oldest first.
    #[must_use]
    pub fn writes(&self, pin: u32) -> Vec<Level> {
        self.pins()
            .get(&pin)
            .map(|p| p.writes.clone())
            .unwrap_or_default()
    }
}

impl Gpio for SimulatedGpio {
    fn configure(&self, pin: u32, mode: PinMode) -> Result<()> {
        self.pins().entry(pin).or_default().mode = Some(mode);
        Ok(())
    }

    fn read_pin(&self, pin: u32) -> Result<Level> {
        let mut pins = self.pins();
        let entry = pins
            .get_mut(&pin)
            .ok_or_else(|| Error::gpio(pin, "pin not configured"))?;
        if let Some(next) = entry.scripted.pop_front() {
            entry.level = Some(next);
        }
        Ok(entry.level.unwrap_or(Level::Low))
    }

    fn write_pin(&self, pin: u32, level: Level) -> Result<()> {
        let mut pins = self.pins();
        let entry = pins
            .get_mut(&pin)
            .ok_or_else(|| Error::gpio(pin, "pin not configured"))?;
        if entry.mode != Some(PinMode::Output) {
            return Err(Error::gpio(pin, "pin is not an output"));
        }
        entry.level = Some(level);
        entry.writes.push(level);
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Gpio for dashwatch_linux::SysfsGpio {
    fn configure(&self, pin: u32, mode: PinMode) -> Result<()> {
        let direction = match mode {
            PinMode::Input => dashwatch_linux::Direction::In,
            PinMode::Output => dashwatch_linux::Direction::Out,
        };
        self.setup(pin, direction)
            .map_err(|e| Error::gpio(pin, e.to_string()))
    }

    fn read_pin(&self, pin: u32) -> Result<Level> {
        self.read_value(pin)
            .map(Level::from)
            .map_err(|e| Error::gpio(pin, e.to_string()))
    }

    fn write_pin(&self, pin: u32, level: Level) -> Result<()> {
        self.write_value(pin, level.is_high())
            .map_err(|e| Error::gpio(pin, e.to_string()))
    }
}
