//! Structured telemetry shared by the host and plugin binaries.
//!
//! Both processes log to stderr: the plugin's stdout carries the handshake
//! line and must stay clean, and the host relays plugin stderr into its own
//! events.


use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tether_config::LogFormat;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The log filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The tracing subscriber could not be installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use; later calls are no-ops.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or another
/// subscriber is already installed.
pub fn initialise(filter: &str, format: LogFormat) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(filter, format))
        .map(|()| TelemetryHandle)
}

fn install_subscriber(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |directives: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(directives)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder(env_filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(env_filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
