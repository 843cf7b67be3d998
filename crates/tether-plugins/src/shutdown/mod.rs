//! Shutdown notification for hosts that hold a plugin open.
//!
//! [`SystemShutdownSignal::install`] takes over SIGTERM, SIGINT, SIGQUIT and
//! SIGHUP as soon as it is called, so a signal that arrives while the plugin
//! is still launching is queued instead of killing the host before it can
//! reap its child.


use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");

/// Signals that request a shutdown.
pub const SHUTDOWN_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener fails.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener fed by process termination signals.
///
/// Clones share one listener.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    received: ShutdownTrigger,
}

impl SystemShutdownSignal {
    /// Registers the signal handlers and starts the listener thread.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when the handlers or the thread
    /// cannot be set up.
    pub fn install() -> Result<Self, ShutdownError> {
        let mut signals =
            Signals::new(SHUTDOWN_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let received = ShutdownTrigger::new();
        let notify = received.clone();
        thread::Builder::new()
            .name(String::from("tether-shutdown-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(target: SHUTDOWN_TARGET, signal, "shutdown signal received");
                    notify.trigger();
                }
            })
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(Self { received })
    }

    /// Returns `true` once a shutdown signal has arrived.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.received.is_triggered()
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        self.received.wait()
    }
}

/// In-process shutdown trigger; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownTrigger {
    /// Creates an untriggered instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases every current and future waiter.
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.state;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    /// Returns `true` once [`ShutdownTrigger::trigger`] has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ShutdownSignal for ShutdownTrigger {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (flag, condvar) = &*self.state;
        let mut triggered = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*triggered {
            triggered = condvar
                .wait(triggered)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }
}
