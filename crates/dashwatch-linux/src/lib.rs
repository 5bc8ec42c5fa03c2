//! Linux-specific implementation for dashwatch
//!
//! This crate provides a GPIO backend built on the kernel's sysfs interface
//! (`/sys/class/gpio`). Each pin is exported once, given a direction, and then
//! read or written through its `value` file.

#![cfg(target_os = "linux")]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default sysfs GPIO root.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Direction writes attempted while a freshly exported node settles.
const SETTLE_ATTEMPTS: u32 = 20;
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Errors raised by the sysfs GPIO backend.
#[derive(Debug, Error)]
pub enum SysfsError {
    /// Exporting the pin to user space failed.
    #[error("failed to export gpio{pin}: {source}")]
    Export {
        /// Pin number.
        pin: u32,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Setting the pin direction failed.
    #[error("failed to set direction of gpio{pin}: {source}")]
    Direction {
        /// Pin number.
        pin: u32,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Reading the pin value failed.
    #[error("failed to read gpio{pin}: {source}")]
    Read {
        /// Pin number.
        pin: u32,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing the pin value failed.
    #[error("failed to write gpio{pin}: {source}")]
    Write {
        /// Pin number.
        pin: u32,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The value file held something other than `0` or `1`.
    #[error("unexpected value {value:?} on gpio{pin}")]
    InvalidValue {
        /// Pin number.
        pin: u32,
        /// The raw contents.
        value: String,
    },
}

/// Result type for sysfs operations.
pub type Result<T> = std::result::Result<T, SysfsError>;

/// Pin direction as understood by sysfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Input pin.
    In,
    /// Output pin.
    Out,
}

impl Direction {
    fn as_sysfs(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// GPIO access through `/sys/class/gpio`.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsGpio {
    /// Create a backend rooted at the given sysfs directory.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The sysfs root this backend operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    /// Export a pin and set its direction.
    ///
    /// Pins that are already exported are left as they are apart from the
    /// direction. The kernel creates `gpioN` asynchronously and udev adjusts
    /// its permissions after that, so the direction write is retried for up
    /// to a second while it fails with `NotFound` or `PermissionDenied`.
    ///
    /// # Errors
    ///
    /// Returns an error if the export fails or the direction cannot be set
    /// within the settle window.
    pub fn setup(&self, pin: u32, direction: Direction) -> Result<()> {
        if !self.pin_dir(pin).exists() {
            debug!(pin, "exporting gpio");
            fs::write(self.root.join("export"), pin.to_string())
                .map_err(|source| SysfsError::Export { pin, source })?;
        }

        let path = self.pin_dir(pin).join("direction");
        let mut attempt = 1;
        loop {
            match fs::write(&path, direction.as_sysfs()) {
                Ok(()) => return Ok(()),
                Err(source) if attempt < SETTLE_ATTEMPTS && is_settling(&source) => {
                    debug!(pin, attempt, error = %source, "gpio node not ready yet");
                    thread::sleep(SETTLE_DELAY);
                    attempt += 1;
                }
                Err(source) => return Err(SysfsError::Direction { pin, source }),
            }
        }
    }

    /// Read the logical value of a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the value file cannot be read or parsed.
    pub fn read_value(&self, pin: u32) -> Result<bool> {
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))
            .map_err(|source| SysfsError::Read { pin, source })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(SysfsError::InvalidValue {
                pin,
                value: other.to_string(),
            }),
        }
    }

    /// Write the logical value of a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the value file cannot be written.
    pub fn write_value(&self, pin: u32, high: bool) -> Result<()> {
        fs::write(self.pin_dir(pin).join("value"), if high { "1" } else { "0" })
            .map_err(|source| SysfsError::Write { pin, source })
    }
}

fn is_settling(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Get platform name
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}
