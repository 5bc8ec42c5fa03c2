//! Daemon wiring.
//!
//! Builds the four supervisor loops from the configuration, runs each on
//! tokio's blocking pool and joins them once shutdown has been requested.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, info_span};

use crate::clock::InterruptibleClock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gpio::{Gpio, GpioBackend, Level, PinMode, SimulatedGpio};
use crate::power::{PowerMonitor, PowerPins, PowerTiming};
use crate::retention::RetentionManager;
use crate::shutdown::{ShutdownCoordinator, ShutdownSignals};
use crate::state::SupervisorState;
use crate::status::StatusIndicator;
use crate::supervisor::{ProcessSupervisor, SupervisorTiming};

/// The assembled supervisor daemon.
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    gpio: Arc<dyn Gpio>,
    state: Arc<SupervisorState>,
}

impl Daemon {
    /// Open the GPIO backend named in the configuration and build the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable on this platform or a
    /// pin cannot be configured.
    pub fn from_config(config: Config) -> Result<Self> {
        let gpio = open_gpio(&config)?;
        Self::new(config, gpio)
    }

    /// Build the daemon on an existing GPIO backend.
    ///
    /// The configuration is validated first. All pins are then configured and
    /// the ignition input is read once; any GPIO failure at this point is
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for an invalid configuration and
    /// [`Error::Gpio`] if a pin cannot be configured or read.
    pub fn new(config: Config, gpio: Arc<dyn Gpio>) -> Result<Self> {
        config.validate()?;

        let pins = &config.gpio;
        gpio.configure(pins.ignition_pin, PinMode::Input)?;
        gpio.configure(pins.keep_alive_pin, PinMode::Output)?;
        gpio.configure(pins.status_led_pin, PinMode::Output)?;

        let ignition = gpio.read_pin(pins.ignition_pin)?;
        info!(%ignition, "gpio ready");

        Ok(Self {
            config,
            gpio,
            state: Arc::new(SupervisorState::new()),
        })
    }

    /// The shared supervisor state.
    #[must_use]
    pub fn state(&self) -> Arc<SupervisorState> {
        Arc::clone(&self.state)
    }

    /// A handle that can request shutdown.
    #[must_use]
    pub fn coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(Arc::clone(&self.state))
    }

    /// Run until SIGINT, SIGTERM or SIGQUIT, then join every loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed or a loop
    /// panicked.
    pub async fn run(self) -> Result<()> {
        let signals = ShutdownSignals::install()?;
        let coordinator = self.coordinator();
        self.run_until(coordinator.listen(signals)).await
    }

    /// Run until `stop` completes (or shutdown is requested through
    /// [`Daemon::coordinator`]), then join every loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a loop panicked.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let coordinator = self.coordinator();
        let mut loops = self.spawn_loops();
        let mut failed = false;

        tokio::select! {
            () = stop => {}
            Some(joined) = loops.join_next() => {
                // Loops only return after shutdown; anything else is a panic.
                if let Err(e) = joined {
                    error!(error = %e, "supervisor loop died, shutting down");
                    failed = true;
                }
            }
        }

        coordinator.request_shutdown();

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "supervisor loop died");
                failed = true;
            }
        }
        info!("all supervisor loops joined");

        if failed {
            return Err(Error::internal("a supervisor loop panicked"));
        }
        Ok(())
    }

    fn spawn_loops(&self) -> JoinSet<()> {
        let config = &self.config;
        let clock = InterruptibleClock::new(Arc::clone(&self.state));
        let mut loops = JoinSet::new();

        let supervisor = ProcessSupervisor::new(
            &config.recorder.executable,
            SupervisorTiming {
                poll_interval: config.child_poll_interval(),
                restart_delay: config.restart_delay(),
                spawn_backoff: config.spawn_backoff(),
            },
            Arc::clone(&self.state),
            clock.clone(),
        );
        let span = info_span!("supervisor");
        loops.spawn_blocking(move || span.in_scope(|| supervisor.run()));

        let power = PowerMonitor::new(
            Arc::clone(&self.gpio),
            PowerPins {
                ignition: config.gpio.ignition_pin,
                keep_alive: config.gpio.keep_alive_pin,
            },
            PowerTiming {
                poll_interval: config.power_poll_interval(),
                debounce: config.debounce(),
                holdoff: config.holdoff(),
            },
            Arc::clone(&self.state),
            clock.clone(),
        );
        let span = info_span!("power");
        loops.spawn_blocking(move || span.in_scope(|| power.run()));

        let retention = RetentionManager::new(
            &config.storage.directory,
            config.retention_policy(),
            config.sweep_interval(),
            clock.clone(),
        );
        let span = info_span!("retention");
        loops.spawn_blocking(move || span.in_scope(|| retention.run()));

        let status = StatusIndicator::new(
            Arc::clone(&self.gpio),
            config.gpio.status_led_pin,
            config.blink(),
            config.idle(),
            Arc::clone(&self.state),
            clock,
        );
        let span = info_span!("status");
        loops.spawn_blocking(move || span.in_scope(|| status.run()));

        loops
    }
}

fn open_gpio(config: &Config) -> Result<Arc<dyn Gpio>> {
    match config.gpio.backend {
        GpioBackend::Sysfs => open_sysfs(config),
        GpioBackend::Simulated => {
            let gpio = SimulatedGpio::new();
            // A bench rig has no ignition wire; pretend the engine is running.
            gpio.set_input(config.gpio.ignition_pin, Level::High);
            Ok(Arc::new(gpio))
        }
    }
}

#[cfg(target_os = "linux")]
fn open_sysfs(config: &Config) -> Result<Arc<dyn Gpio>> {
    Ok(Arc::new(dashwatch_linux::SysfsGpio::new(
        &config.gpio.sysfs_root,
    )))
}

#[cfg(not(target_os = "linux"))]
fn open_sysfs(config: &Config) -> Result<Arc<dyn Gpio>> {
    Err(Error::gpio(
        config.gpio.ignition_pin,
        "the sysfs backend is only available on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn bench_config(dir: &std::path::Path) -> Config {
        crate::logging::init_test_logging();
        let mut config = Config::default();
        config.gpio.backend = GpioBackend::Simulated;
        config.recorder.executable = dir.join("missing-recorder");
        config.recorder.spawn_backoff_secs = 60;
        config.storage.directory = dir.to_path_buf();
        config
    }

    #[test]
    fn test_new_configures_pins() {
        let dir = tempfile::tempdir().unwrap();
        let config = bench_config(dir.path());
        let gpio = Arc::new(SimulatedGpio::new());

        Daemon::new(config.clone(), Arc::clone(&gpio) as Arc<dyn Gpio>).unwrap();

        assert_eq!(gpio.mode(config.gpio.ignition_pin), Some(PinMode::Input));
        assert_eq!(gpio.mode(config.gpio.keep_alive_pin), Some(PinMode::Output));
        assert_eq!(gpio.mode(config.gpio.status_led_pin), Some(PinMode::Output));
    }

    #[derive(Debug)]
    struct BrokenGpio;

    impl Gpio for BrokenGpio {
        fn configure(&self, pin: u32, _mode: PinMode) -> Result<()> {
            Err(Error::gpio(pin, "no such device"))
        }

        fn read_pin(&self, pin: u32) -> Result<Level> {
            Err(Error::gpio(pin, "no such device"))
        }

        fn write_pin(&self, pin: u32, _level: Level) -> Result<()> {
            Err(Error::gpio(pin, "no such device"))
        }
    }

    #[test]
    fn test_gpio_failure_at_startup_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Daemon::new(bench_config(dir.path()), Arc::new(BrokenGpio)).unwrap_err();
        assert!(err.is_gpio_error());
    }

    #[test]
    fn test_new_rejects_zero_spawn_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = bench_config(dir.path());
        config.recorder.spawn_backoff_secs = 0;
        let gpio = Arc::new(SimulatedGpio::new());

        let err = Daemon::new(config, Arc::clone(&gpio) as Arc<dyn Gpio>).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        // Nothing was touched before validation failed.
        assert_eq!(gpio.mode(25), None);
    }

    #[test]
    fn test_from_config_simulated() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::from_config(bench_config(dir.path())).unwrap();
        assert!(!daemon.state().is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_run_until_joins_all_loops() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::from_config(bench_config(dir.path())).unwrap();
        let state = daemon.state();

        let start = Instant::now();
        daemon
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(state.is_shutdown_requested());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_coordinator_stops_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::from_config(bench_config(dir.path())).unwrap();
        let coordinator = daemon.coordinator();

        let running = tokio::spawn(daemon.run_until(std::future::pending()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.request_shutdown());

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("daemon did not stop")
            .unwrap()
            .unwrap();
    }
}
