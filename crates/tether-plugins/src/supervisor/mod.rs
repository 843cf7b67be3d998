//! Plugin process supervision.
//!
//! A [`Supervisor`] owns one plugin subprocess from spawn to reap:
//!
//! ```text
//! NotStarted -> Starting -> Ready -> Running -> Exited(Graceful | Killed | Crashed)
//! ```
//!
//! Startup spawns the executable, waits for the handshake line and connects
//! the RPC transport to the advertised endpoint. Any failure on that path
//! kills the process and leaves the supervisor in `Exited(Crashed)`. A
//! monitor thread notices natural exits, and dropping the supervisor kills
//! the plugin, so the subprocess never outlives its owner.


use std::fmt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use tether_config::{DEFAULT_KILL_TIMEOUT, DEFAULT_START_TIMEOUT, Network};
use tracing::{debug, info, warn};

use crate::broker::Connection;
use crate::error::PluginError;
use crate::handshake::{self, HandshakeConfig, HandshakeError, Negotiated, TRANSPORT_ENV};
use crate::process::{self, ProcessHandle, Termination};
use crate::transport::{RpcTransport, Transport, TransportError, TransportOptions};

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");
const MONITOR_INTERVAL: Duration = Duration::from_millis(50);

/// Why a plugin process is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    /// The plugin exited on its own with a success status.
    Graceful,
    /// The host terminated the plugin.
    Killed,
    /// The plugin failed during startup or exited with a failure status.
    Crashed,
}

impl ExitReason {
    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            Self::Graceful
        } else {
            Self::Crashed
        }
    }
}

/// Lifecycle state of a supervised plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// Configured but not spawned.
    NotStarted,
    /// Spawned; handshake or connection in progress.
    Starting,
    /// Handshake accepted and transport connected.
    Ready,
    /// At least one capability has been dispensed.
    Running,
    /// The process is gone.
    Exited(ExitReason),
}

impl SupervisorState {
    /// Returns `true` in `Ready` and `Running`.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Returns `true` once the process has exited.
    #[must_use]
    pub const fn is_exited(self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Starting => f.write_str("starting"),
            Self::Ready => f.write_str("ready"),
            Self::Running => f.write_str("running"),
            Self::Exited(reason) => write!(f, "exited ({reason})"),
        }
    }
}

/// How to launch a plugin.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    executable: Utf8PathBuf,
    args: Vec<String>,
    handshake: HandshakeConfig,
    start_timeout: Duration,
    kill_timeout: Duration,
    transport: TransportOptions,
    network: Option<Network>,
    env: Vec<(String, String)>,
}

impl LaunchConfig {
    /// Launches `executable` expecting `handshake`, with default timeouts.
    #[must_use]
    pub fn new(executable: impl Into<Utf8PathBuf>, handshake: HandshakeConfig) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            handshake,
            start_timeout: DEFAULT_START_TIMEOUT,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            transport: TransportOptions::default(),
            network: None,
            env: Vec::new(),
        }
    }

    /// Appends command-line arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the handshake deadline.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Sets the RPC transport options.
    #[must_use]
    pub const fn with_transport_options(mut self, options: TransportOptions) -> Self {
        self.transport = options;
        self
    }

    /// Asks the plugin to listen on `network` instead of its default.
    #[must_use]
    pub const fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    /// Adds an environment variable to the plugin's environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Plugin executable.
    #[must_use]
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Expected handshake.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeConfig {
        &self.handshake
    }

    /// Handshake deadline.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    /// Grace period before SIGKILL.
    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.executable.as_std_path());
        command
            .args(&self.args)
            .envs(self.handshake.launch_environment())
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(network) = self.network {
            command.env(TRANSPORT_ENV, network.to_string());
        }
        command
    }
}

#[derive(Debug)]
struct Runtime {
    state: SupervisorState,
    negotiated: Option<Negotiated>,
    transport: Option<Arc<RpcTransport>>,
}

#[derive(Debug)]
struct Inner {
    config: LaunchConfig,
    runtime: Mutex<Runtime>,
    process: OnceCell<Arc<ProcessHandle>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `Exited(reason)` unless an exit was already recorded.
    /// Returns the transport so the caller can close it outside the lock.
    fn record_exit(&self, reason: ExitReason) -> Option<Arc<RpcTransport>> {
        let mut runtime = self.lock();
        if runtime.state.is_exited() {
            return None;
        }
        runtime.state = SupervisorState::Exited(reason);
        runtime.transport.clone()
    }

    fn observe_natural_exit(&self, status: ExitStatus) {
        let reason = ExitReason::from_status(status);
        if let Some(transport) = self.record_exit(reason) {
            transport.close(TransportError::ProcessExited);
        }
        match reason {
            ExitReason::Graceful => info!(target: SUPERVISOR_TARGET, %status, "plugin exited"),
            ExitReason::Killed | ExitReason::Crashed => {
                warn!(target: SUPERVISOR_TARGET, %status, "plugin exited unexpectedly");
            }
        }
    }
}

/// Owns a plugin subprocess and its RPC transport.
///
/// `Supervisor` is `Send + Sync`; [`Supervisor::kill`] may be called from
/// any thread. Dropping it kills the plugin.
#[derive(Debug)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Creates a supervisor in `NotStarted`.
    #[must_use]
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runtime: Mutex::new(Runtime {
                    state: SupervisorState::NotStarted,
                    negotiated: None,
                    transport: None,
                }),
                process: OnceCell::new(),
            }),
        }
    }

    /// Creates and starts a supervisor.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::start`]. The plugin has been reaped when this
    /// fails.
    pub fn launch(config: LaunchConfig) -> Result<Self, PluginError> {
        let supervisor = Self::new(config);
        supervisor.start()?;
        Ok(supervisor)
    }

    /// Spawns the plugin, negotiates the handshake and connects the
    /// transport.
    ///
    /// # Errors
    ///
    /// - [`PluginError::AlreadyStarted`] outside `NotStarted`;
    /// - [`PluginError::Spawn`] when the executable cannot be started;
    /// - [`PluginError::Handshake`] when negotiation fails;
    /// - [`PluginError::Transport`] when the endpoint cannot be reached.
    pub fn start(&self) -> Result<(), PluginError> {
        {
            let mut runtime = self.inner.lock();
            if runtime.state != SupervisorState::NotStarted {
                return Err(PluginError::AlreadyStarted);
            }
            runtime.state = SupervisorState::Starting;
        }

        let executable = self.inner.config.executable();
        debug!(target: SUPERVISOR_TARGET, %executable, "starting plugin");
        match self.spawn_and_connect() {
            Ok((negotiated, transport)) => self.finish_start(negotiated, transport),
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, %executable, %error, "plugin failed to start");
                self.abort_start();
                Err(error)
            }
        }
    }

    fn spawn_and_connect(&self) -> Result<(Negotiated, Arc<RpcTransport>), PluginError> {
        let config = &self.inner.config;
        let mut child = config
            .command()
            .spawn()
            .map_err(|source| PluginError::Spawn {
                executable: config.executable().to_string(),
                source: Arc::new(source),
            })?;
        let piped_stdout = child.stdout.take();
        let piped_stderr = child.stderr.take();
        let handle = Arc::new(ProcessHandle::new(child));
        let pid = handle.pid();
        if self.inner.process.set(handle).is_err() {
            warn!(target: SUPERVISOR_TARGET, pid, "plugin process was already recorded");
        }
        // A kill that ran before the handle was recorded had nothing to
        // terminate; the caller's abort path reaps the child instead.
        let state = self.state();
        if state.is_exited() {
            return Err(PluginError::NotReady { state });
        }
        if let Some(stderr) = piped_stderr {
            process::relay_stderr(stderr, pid);
        }

        let stdout = piped_stdout.ok_or(HandshakeError::StreamClosed)?;
        let negotiated = handshake::negotiate(stdout, config.handshake(), config.start_timeout())?;
        let transport = RpcTransport::connect(&negotiated.endpoint, config.transport)?;
        Ok((negotiated, Arc::new(transport)))
    }

    fn finish_start(
        &self,
        negotiated: Negotiated,
        transport: Arc<RpcTransport>,
    ) -> Result<(), PluginError> {
        let mut runtime = self.inner.lock();
        if runtime.state != SupervisorState::Starting {
            // Killed while the handshake was in flight.
            let state = runtime.state;
            drop(runtime);
            transport.close(TransportError::Closed);
            self.terminate_process();
            return Err(PluginError::NotReady { state });
        }
        info!(
            target: SUPERVISOR_TARGET,
            pid = self.pid(),
            endpoint = %negotiated.endpoint,
            protocol_version = negotiated.protocol_version,
            "plugin ready"
        );
        runtime.state = SupervisorState::Ready;
        runtime.negotiated = Some(negotiated);
        runtime.transport = Some(transport);
        drop(runtime);
        self.spawn_monitor();
        Ok(())
    }

    fn terminate_process(&self) -> Option<Termination> {
        self.inner
            .process
            .get()
            .map(|handle| handle.terminate(self.inner.config.kill_timeout()))
    }

    fn abort_start(&self) {
        let termination = self.terminate_process();
        debug!(target: SUPERVISOR_TARGET, ?termination, "startup aborted");
        if let Some(transport) = self.inner.record_exit(ExitReason::Crashed) {
            transport.close(TransportError::ProcessExited);
        }
    }

    fn spawn_monitor(&self) {
        let Some(handle) = self.inner.process.get().map(Arc::clone) else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name(String::from("tether-plugin-monitor"))
            .spawn(move || monitor(&weak, &handle));
        if let Err(error) = spawned {
            warn!(target: SUPERVISOR_TARGET, %error, "could not start plugin monitor");
        }
    }

    /// Terminates the plugin. Idempotent and infallible.
    ///
    /// The state becomes `Exited(Killed)` before the process is signalled,
    /// and in-flight calls fail with [`TransportError::Closed`]. The plugin
    /// gets the configured kill timeout to exit after SIGTERM before it is
    /// killed outright. A plugin that already exited on its own keeps the
    /// reason the monitor recorded for it.
    ///
    /// Calling this while another thread is inside [`Supervisor::start`] is
    /// safe: startup notices the exit, reaps the child and fails with
    /// [`PluginError::NotReady`].
    pub fn kill(&self) {
        let current = {
            let mut runtime = self.inner.lock();
            if runtime.state.is_exited() {
                return;
            }
            runtime.state = SupervisorState::Exited(ExitReason::Killed);
            runtime.transport.clone()
        };
        if let Some(transport) = current {
            transport.close(TransportError::Closed);
        }
        let termination = self.terminate_process();
        info!(
            target: SUPERVISOR_TARGET,
            pid = self.pid(),
            ?termination,
            "plugin stopped"
        );
    }

    /// Closes the transport with `reason` without touching the process.
    pub fn close_transport(&self, reason: TransportError) {
        let current = self.inner.lock().transport.clone();
        if let Some(transport) = current {
            transport.close(reason);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.inner.lock().state
    }

    /// Returns `true` while the plugin is `Ready` or `Running`.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Process id, once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.process.get().map(|handle| handle.pid())
    }

    /// Launch configuration.
    #[must_use]
    pub fn config(&self) -> &LaunchConfig {
        &self.inner.config
    }
}

impl Connection for Supervisor {
    fn state(&self) -> SupervisorState {
        Self::state(self)
    }

    fn negotiated(&self) -> Option<Negotiated> {
        self.inner.lock().negotiated.clone()
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .lock()
            .transport
            .clone()
            .map(|transport| transport as Arc<dyn Transport>)
    }

    fn mark_running(&self) {
        let mut runtime = self.inner.lock();
        if runtime.state == SupervisorState::Ready {
            runtime.state = SupervisorState::Running;
            debug!(target: SUPERVISOR_TARGET, "plugin running");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.kill();
    }
}

fn monitor(owner: &Weak<Inner>, handle: &ProcessHandle) {
    loop {
        thread::sleep(MONITOR_INTERVAL);
        let Some(inner) = owner.upgrade() else {
            return;
        };
        if inner.lock().state.is_exited() {
            return;
        }
        if let Some(status) = handle.poll_exit() {
            inner.observe_natural_exit(status);
            return;
        }
    }
}
