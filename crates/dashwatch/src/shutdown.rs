//! Coordinated shutdown.
//!
//! OS signals are received by an async task that does nothing but flag
//! shutdown on the shared state. The loops notice through the interruptible
//! clock and wind down on their own.
//!
//! ## Unix
//! SIGINT, SIGTERM and SIGQUIT are handled.
//!
//! ## Other platforms
//! Only ctrl-c is handled.

use std::sync::Arc;

use tracing::info;

use crate::state::SupervisorState;

/// Process-wide termination switch.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<SupervisorState>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for the shared state.
    #[must_use]
    pub fn new(state: Arc<SupervisorState>) -> Self {
        Self { state }
    }

    /// Request shutdown: clear `recording`, flag shutdown and wake every
    /// sleeping loop.
    ///
    /// Returns `true` the first time and `false` on every later call.
    pub fn request_shutdown(&self) -> bool {
        let first = self.state.request_shutdown();
        if first {
            info!("shutdown requested, stopping supervisor loops");
        }
        first
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.state.is_shutdown_requested()
    }

    /// Wait for the first termination signal and request shutdown.
    ///
    /// Handlers are installed by the caller so registration errors surface
    /// before any loop starts.
    pub async fn listen(self, mut signals: ShutdownSignals) {
        signals.recv().await;
        self.request_shutdown();
    }
}

/// Installed termination signal handlers.
#[derive(Debug)]
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigquit: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install handlers. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be registered.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Install handlers. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => info!("received SIGINT"),
            _ = self.sigterm.recv() => info!("received SIGTERM"),
            _ = self.sigquit.recv() => info!("received SIGQUIT"),
        }
    }

    /// Wait for the next termination signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}
