//! Configuration management for dashwatch.
//!
//! Configuration is read once at startup using figment, layering defaults, a
//! TOML file and environment variables. Nothing is reconfigured at runtime.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gpio::GpioBackend;
use crate::retention::RetentionPolicy;

/// Default configuration file location.
const DEFAULT_CONFIG_PATH: &str = "/etc/dashwatch/config.toml";

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DASHWATCH_CONFIG";

/// Prefix for environment overrides of individual keys.
const ENV_PREFIX: &str = "DASHWATCH_";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `DASHWATCH_`, sections split by `__`)
/// 2. TOML config file at `$DASHWATCH_CONFIG` or `/etc/dashwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorder process configuration.
    pub recorder: RecorderConfig,
    /// Footage retention configuration.
    pub storage: StorageConfig,
    /// Ignition monitoring configuration.
    pub power: PowerConfig,
    /// Status LED configuration.
    pub indicator: IndicatorConfig,
    /// Pin assignments and driver.
    pub gpio: GpioConfig,
}

/// Recorder process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Executable started with no arguments.
    pub executable: PathBuf,
    /// How often the child is polled for exit, in milliseconds.
    pub poll_interval_ms: u64,
    /// Pause after a child exit before respawning, in seconds.
    pub restart_delay_secs: u64,
    /// Pause after a failed spawn before retrying, in seconds.
    pub spawn_backoff_secs: u64,
}

/// Footage retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the recordings.
    pub directory: PathBuf,
    /// Usage ceiling that triggers bulk eviction.
    pub max_total_bytes: u64,
    /// Minimum age in days of the oldest file before it may be evicted.
    pub min_age_days: u32,
    /// Files at or below this size count as aborted recordings.
    pub small_file_bytes: u64,
    /// Minimum age in seconds before an aborted recording is removed.
    pub small_file_min_age_secs: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Upper bound on bulk evictions per sweep.
    pub max_evictions_per_sweep: usize,
}

/// Ignition monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Ignition poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// How long power must stay absent before the recorder is stopped.
    pub debounce_ms: u64,
    /// Pause after handling a power loss.
    pub holdoff_ms: u64,
}

/// Status LED configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Half-period of the recording blink in milliseconds.
    pub blink_ms: u64,
    /// Re-check interval while not recording, in milliseconds.
    pub idle_ms: u64,
}

/// Pin assignments and driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// GPIO driver.
    pub backend: GpioBackend,
    /// Root of the sysfs GPIO tree.
    pub sysfs_root: PathBuf,
    /// Ignition-sense input.
    pub ignition_pin: u32,
    /// Power-latch keep-alive output.
    pub keep_alive_pin: u32,
    /// Recording LED output.
    pub status_led_pin: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/home/orangepi/C++/dashcam_app/dashcam"),
            poll_interval_ms: 1000,
            restart_delay_secs: 5,
            spawn_backoff_secs: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/home/orangepi/C++/dashcam_app/videos"),
            max_total_bytes: 50 * GIB,
            min_age_days: 7,
            small_file_bytes: 25 * MIB,
            small_file_min_age_secs: 300,
            sweep_interval_secs: 30,
            max_evictions_per_sweep: 1,
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            debounce_ms: 2000,
            holdoff_ms: 2000,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            blink_ms: 1000,
            idle_ms: 2000,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::Sysfs,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            ignition_pin: 25,
            keep_alive_pin: 23,
            status_led_pin: 14,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG", "LOG"]).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration file path: `$DASHWATCH_CONFIG` if set,
    /// otherwise `/etc/dashwatch/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.recorder.executable.as_os_str().is_empty() {
            return Err(Error::validation("recorder.executable must not be empty"));
        }

        let intervals = [
            ("recorder.poll_interval_ms", self.recorder.poll_interval_ms),
            ("recorder.restart_delay_secs", self.recorder.restart_delay_secs),
            ("recorder.spawn_backoff_secs", self.recorder.spawn_backoff_secs),
            ("storage.sweep_interval_secs", self.storage.sweep_interval_secs),
            ("power.poll_interval_ms", self.power.poll_interval_ms),
            ("power.debounce_ms", self.power.debounce_ms),
            ("power.holdoff_ms", self.power.holdoff_ms),
            ("indicator.blink_ms", self.indicator.blink_ms),
            ("indicator.idle_ms", self.indicator.idle_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::validation(format!("{name} must be greater than 0")));
            }
        }

        if self.storage.max_total_bytes == 0 {
            return Err(Error::validation(
                "storage.max_total_bytes must be greater than 0",
            ));
        }

        if self.storage.max_evictions_per_sweep == 0 {
            return Err(Error::validation(
                "storage.max_evictions_per_sweep must be greater than 0",
            ));
        }

        let pins = [
            self.gpio.ignition_pin,
            self.gpio.keep_alive_pin,
            self.gpio.status_led_pin,
        ];
        let unique: HashSet<_> = pins.iter().collect();
        if unique.len() != pins.len() {
            return Err(Error::validation(format!(
                "gpio pins must be distinct (ignition {}, keep-alive {}, status led {})",
                pins[0], pins[1], pins[2]
            )));
        }

        Ok(())
    }

    /// Retention policy derived from the storage section.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_total_bytes: self.storage.max_total_bytes,
            min_age_days_for_bulk_eviction: self.storage.min_age_days,
            small_file_byte_threshold: self.storage.small_file_bytes,
            small_file_min_age: Duration::from_secs(self.storage.small_file_min_age_secs),
            max_evictions_per_sweep: self.storage.max_evictions_per_sweep,
        }
    }

    /// Child exit poll interval.
    #[must_use]
    pub fn child_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recorder.poll_interval_ms)
    }

    /// Delay before respawning an exited child.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.recorder.restart_delay_secs)
    }

    /// Delay before retrying a failed spawn.
    #[must_use]
    pub fn spawn_backoff(&self) -> Duration {
        Duration::from_secs(self.recorder.spawn_backoff_secs)
    }

    /// Interval between retention sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.storage.sweep_interval_secs)
    }

    /// Ignition poll interval.
    #[must_use]
    pub fn power_poll_interval(&self) -> Duration {
        Duration::from_millis(self.power.poll_interval_ms)
    }

    /// Ignition debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.power.debounce_ms)
    }

    /// Pause after handling a power loss.
    #[must_use]
    pub fn holdoff(&self) -> Duration {
        Duration::from_millis(self.power.holdoff_ms)
    }

    /// Blink half-period.
    #[must_use]
    pub fn blink(&self) -> Duration {
        Duration::from_millis(self.indicator.blink_ms)
    }

    /// Idle re-check interval.
    #[must_use]
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.indicator.idle_ms)
    }
}
