//! Error types for dashwatch.
//!
//! Every component loop absorbs its own failures; these types surface at the
//! edges, during startup and from the individual operations the loops call.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dashwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Hardware Errors ===
    /// A GPIO operation failed.
    #[error("gpio error on pin {pin}: {message}")]
    Gpio {
        /// Pin number the operation targeted.
        pin: u32,
        /// Description of what went wrong.
        message: String,
    },

    // === Process Errors ===
    /// The recorder executable could not be started.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        /// Path of the executable.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Sending a signal to the child failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// The underlying error.
        #[source]
        source: nix::Error,
    },

    // === Storage Errors ===
    /// The storage directory could not be listed.
    #[error("failed to scan {path}: {source}")]
    StorageScan {
        /// Directory that was scanned.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for dashwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new GPIO error.
    #[must_use]
    pub fn gpio(pin: u32, message: impl Into<String>) -> Self {
        Self::Gpio {
            pin,
            message: message.into(),
        }
    }

    /// Create a new configuration validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from the GPIO layer.
    #[must_use]
    pub fn is_gpio_error(&self) -> bool {
        matches!(self, Self::Gpio { .. })
    }
}
