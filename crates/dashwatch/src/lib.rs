//! `dashwatch` - Supervisor daemon for a vehicle dashcam
//!
//! This library keeps a recorder process alive, stops it cleanly when the
//! vehicle loses ignition power, enforces a retention policy on recorded
//! footage and blinks a status LED while recording.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gpio;
pub mod logging;
pub mod power;
pub mod retention;
pub mod shutdown;
pub mod state;
pub mod status;
pub mod supervisor;

pub use clock::InterruptibleClock;
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use gpio::{Gpio, GpioBackend, Level, PinMode, SimulatedGpio};
pub use logging::init_logging;
pub use retention::{DirectoryUsage, RetentionManager, RetentionPolicy, SweepReport};
pub use shutdown::ShutdownCoordinator;
pub use state::{StateSnapshot, SupervisorState};
