//! Host runtime for the Tether calculator example.
//!
//! [`run`] resolves the layered configuration, installs telemetry, launches
//! the calculator plugin, prints a short demonstration to stdout and shuts
//! the plugin down in order. With `--hold true` the plugin is kept alive
//! until SIGINT, SIGTERM, SIGQUIT or SIGHUP arrives; the same signals stop
//! the plugin early when they arrive during launch or the demonstration.

pub mod demo;
mod errors;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use ortho_config::OrthoConfig;
use tether_config::{Config, PLUGIN_LOG_FILTER_ENV};
use tether_plugins::shutdown::{ShutdownSignal, SystemShutdownSignal};
use tether_plugins::telemetry;
use tether_plugins::{ClientConfig, PluginClient, TransportOptions, shutdown_on_signal};
use tracing::{error, info};

pub use self::errors::HostError;

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");

/// Source of the host configuration.
pub trait ConfigLoader {
    /// Loads configuration from the given command-line arguments.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::LoadConfiguration`] when a layer fails to parse.
    fn load(&self, args: Vec<OsString>) -> Result<Config, HostError>;
}

/// Loads configuration through `ortho_config`'s layered sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: Vec<OsString>) -> Result<Config, HostError> {
        Config::load_from_iter(args).map_err(HostError::LoadConfiguration)
    }
}

/// Builds the plugin client configuration from the host configuration.
#[must_use]
pub fn client_config(config: &Config) -> ClientConfig {
    ClientConfig::calculator(config.plugin_path()).map_launch(|launch| {
        launch
            .with_start_timeout(config.start_timeout())
            .with_kill_timeout(config.kill_timeout())
            .with_transport_options(
                TransportOptions::default().with_call_timeout(config.call_timeout()),
            )
            .with_env(PLUGIN_LOG_FILTER_ENV, config.log_filter())
    })
}

/// Runs the host with the process arguments and standard streams.
///
/// Shutdown signals are taken over before anything else happens.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    match SystemShutdownSignal::install() {
        Ok(signal) => run_with(args, stdout, stderr, &OrthoConfigLoader, &signal),
        Err(failure) => report(stderr, &HostError::from(failure)),
    }
}

/// Runs the host with an explicit configuration loader and shutdown signal.
///
/// Failures are written to `stderr` and mapped to [`ExitCode::FAILURE`].
pub fn run_with<I, W, E, S>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &impl ConfigLoader,
    signal: &S,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    S: ShutdownSignal + Clone + 'static,
{
    match execute(args.into_iter().collect(), stdout, loader, signal) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => report(stderr, &failure),
    }
}

fn report<E: Write>(stderr: &mut E, failure: &HostError) -> ExitCode {
    error!(target: HOST_TARGET, error = %failure, "host run failed");
    writeln!(stderr, "{failure}").ok();
    ExitCode::FAILURE
}

fn execute<W, S>(
    args: Vec<OsString>,
    stdout: &mut W,
    loader: &impl ConfigLoader,
    signal: &S,
) -> Result<(), HostError>
where
    W: Write,
    S: ShutdownSignal + Clone + 'static,
{
    let config = loader.load(args)?;
    telemetry::initialise(config.log_filter(), config.log_format())?;
    info!(
        target: HOST_TARGET,
        plugin = %config.plugin_path(),
        "launching plugin"
    );

    let client = Arc::new(PluginClient::launch(client_config(&config))?);
    let watched = shutdown_on_signal(&client, signal.clone());
    let outcome = watched
        .map_err(HostError::from)
        .and_then(|()| client.dispense_calculator().map_err(HostError::from))
        .and_then(|calculator| demo::run(&calculator, config.iterations(), stdout));

    if outcome.is_ok() && config.hold() {
        info!(target: HOST_TARGET, "holding plugin until a shutdown signal arrives");
        client.run_until_shutdown(signal)?;
    } else {
        client.shutdown();
    }
    outcome
}
