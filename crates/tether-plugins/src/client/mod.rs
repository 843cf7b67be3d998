//! Host-side facade tying supervision, brokering and shutdown together.


use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::broker::{CapabilityBroker, PluginSet};
use crate::capability::{
    CALCULATOR_CAPABILITY, CALCULATOR_HANDSHAKE, CalculatorProxy, Capability, GracefulShutdown,
};
use crate::error::PluginError;
use crate::shutdown::{ShutdownError, ShutdownSignal};
use crate::supervisor::{LaunchConfig, Supervisor};
use crate::transport::TransportError;

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// What to launch and which capabilities to expect from it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    launch: LaunchConfig,
    plugins: PluginSet,
}

impl ClientConfig {
    /// Pairs a launch configuration with the expected capabilities.
    #[must_use]
    pub const fn new(launch: LaunchConfig, plugins: PluginSet) -> Self {
        Self { launch, plugins }
    }

    /// Configuration for a calculator plugin at `executable`.
    #[must_use]
    pub fn calculator(executable: impl Into<Utf8PathBuf>) -> Self {
        Self::new(
            LaunchConfig::new(executable, CALCULATOR_HANDSHAKE),
            PluginSet::calculator(),
        )
    }

    /// Adjusts the launch configuration.
    #[must_use]
    pub fn map_launch(mut self, adjust: impl FnOnce(LaunchConfig) -> LaunchConfig) -> Self {
        self.launch = adjust(self.launch);
        self
    }
}

/// A running plugin and the capabilities dispensed from it.
///
/// Dropping the client drops its [`Supervisor`], which kills the plugin.
#[derive(Debug)]
pub struct PluginClient {
    supervisor: Supervisor,
    broker: CapabilityBroker,
    dispensed: Mutex<Vec<Capability>>,
    shut_down: Mutex<bool>,
}

impl PluginClient {
    /// Launches the plugin and waits for it to become ready.
    ///
    /// # Errors
    ///
    /// Returns the startup failure; the plugin has been reaped by then.
    pub fn launch(config: ClientConfig) -> Result<Self, PluginError> {
        let ClientConfig { launch, plugins } = config;
        let supervisor = Supervisor::launch(launch)?;
        Ok(Self {
            supervisor,
            broker: CapabilityBroker::new(plugins),
            dispensed: Mutex::new(Vec::new()),
            shut_down: Mutex::new(false),
        })
    }

    /// Dispenses the capability `name`.
    ///
    /// # Errors
    ///
    /// See [`CapabilityBroker::dispense`].
    pub fn dispense(&self, name: &str) -> Result<Capability, PluginError> {
        let capability = self.broker.dispense(&self.supervisor, name)?;
        let mut dispensed = self.dispensed.lock().unwrap_or_else(PoisonError::into_inner);
        if dispensed.iter().all(|known| known.name() != name) {
            dispensed.push(capability.clone());
        }
        Ok(capability)
    }

    /// Dispenses the `calculator` capability as a typed proxy.
    ///
    /// # Errors
    ///
    /// See [`PluginClient::dispense`].
    pub fn dispense_calculator(&self) -> Result<CalculatorProxy, PluginError> {
        self.dispense(CALCULATOR_CAPABILITY)?.into_calculator()
    }

    /// The underlying supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Returns `true` while the plugin is `Ready` or `Running`.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.supervisor.is_alive()
    }

    /// Shuts the plugin down in order: asks every dispensed capability to
    /// shut down, fails calls still in flight with
    /// [`TransportError::ShuttingDown`], then kills the process.
    ///
    /// The graceful step gets the launch's kill timeout; a plugin that has
    /// not answered by then is shut down regardless. Idempotent, and
    /// concurrent callers return only once the plugin is gone. Capability
    /// failures are logged, not returned.
    pub fn shutdown(&self) {
        let mut shut_down = self.shut_down.lock().unwrap_or_else(PoisonError::into_inner);
        if *shut_down {
            return;
        }
        *shut_down = true;
        let capabilities =
            std::mem::take(&mut *self.dispensed.lock().unwrap_or_else(PoisonError::into_inner));
        if self.supervisor.is_alive() && !capabilities.is_empty() {
            shut_down_capabilities(capabilities, self.supervisor.config().kill_timeout());
        }
        self.supervisor.close_transport(TransportError::ShuttingDown);
        self.supervisor.kill();
    }

    /// Blocks until `signal` fires, then shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the signal listener fails; the plugin
    /// is shut down regardless.
    pub fn run_until_shutdown(&self, signal: &impl ShutdownSignal) -> Result<(), ShutdownError> {
        let waited = signal.wait();
        info!(target: CLIENT_TARGET, "shutting down plugin");
        self.shutdown();
        waited
    }
}

/// Shuts `client` down from a background thread once `signal` fires.
///
/// The watcher holds only a weak reference, so it never keeps the client
/// alive; a client dropped first has already killed its plugin.
///
/// # Errors
///
/// Returns [`ShutdownError::Install`] when the watcher thread cannot start.
pub fn shutdown_on_signal<S>(client: &Arc<PluginClient>, signal: S) -> Result<(), ShutdownError>
where
    S: ShutdownSignal + 'static,
{
    let watched = Arc::downgrade(client);
    thread::Builder::new()
        .name(String::from("tether-shutdown-watch"))
        .spawn(move || {
            if let Err(error) = signal.wait() {
                warn!(target: CLIENT_TARGET, %error, "shutdown signal listener failed");
                return;
            }
            if let Some(owner) = watched.upgrade() {
                info!(target: CLIENT_TARGET, "shutdown signal received, stopping plugin");
                owner.shutdown();
            }
        })
        .map(drop)
        .map_err(|source| ShutdownError::Install { source })
}

/// Runs each capability's graceful shutdown on a helper thread and waits at
/// most `grace` for them all.
///
/// A wedged call is released when the caller closes the transport.
fn shut_down_capabilities(capabilities: Vec<Capability>, grace: Duration) {
    let (done_tx, done_rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(String::from("tether-capability-shutdown"))
        .spawn(move || {
            for capability in &capabilities {
                match capability.shutdown() {
                    Ok(()) => info!(
                        target: CLIENT_TARGET,
                        capability = capability.name(),
                        "capability shut down"
                    ),
                    Err(error) => warn!(
                        target: CLIENT_TARGET,
                        capability = capability.name(),
                        %error,
                        "capability shutdown failed"
                    ),
                }
            }
            done_tx.send(()).ok();
        });
    if let Err(error) = spawned {
        warn!(target: CLIENT_TARGET, %error, "could not run capability shutdown");
        return;
    }
    if done_rx.recv_timeout(grace).is_err() {
        warn!(
            target: CLIENT_TARGET,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "capability shutdown timed out"
        );
    }
}
