//! `dashwatch` - supervisor daemon binary
//!
//! Loads the configuration, opens the GPIO backend and runs the supervisor
//! loops until a termination signal arrives.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use tracing::{debug, info};

use dashwatch::logging::Verbosity;
use dashwatch::{init_logging, Config, Daemon};

// Platform-specific imports using conditional compilation
#[cfg(target_os = "linux")]
use dashwatch_linux as platform;

#[cfg(target_os = "linux")]
fn platform_name() -> &'static str {
    platform::platform_name()
}

#[cfg(not(target_os = "linux"))]
fn platform_name() -> &'static str {
    std::env::consts::OS
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(Verbosity::from_env());

    let config_path = Config::default_config_path();
    let config = Config::load_from(Some(config_path.clone()))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    debug!(config = %serde_json::to_string(&config)?, "effective configuration");

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = platform_name(),
        backend = %config.gpio.backend,
        "dashwatch starting"
    );

    let daemon = Daemon::from_config(config).context("initialising gpio")?;
    daemon.run().await.context("running supervisor")?;

    info!("dashwatch stopped");
    Ok(())
}
