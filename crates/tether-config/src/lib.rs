//! Shared configuration for the Tether host and plugins.
//!
//! The crate holds the endpoint descriptor exchanged during the plugin
//! handshake ([`SocketEndpoint`]), the logging format shared by both
//! binaries, and the layered host [`Config`]. Configuration values are
//! resolved by `ortho_config` from defaults, configuration files, `TETHER_*`
//! environment variables and command-line flags, in increasing precedence.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    CALCULATOR_PLUGIN_BINARY, DEFAULT_ITERATIONS, DEFAULT_KILL_TIMEOUT, DEFAULT_LOG_FILTER,
    DEFAULT_START_TIMEOUT, PLUGIN_LOG_FILTER_ENV, default_log_filter, default_log_format,
    default_plugin_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{Network, SocketEndpoint, SocketParseError};

/// Layered configuration for the `tether-host` binary.
///
/// Every field is optional in the layered sources; the accessor methods
/// apply the documented defaults. Load it with
/// `Config::load_from_iter(std::env::args_os())`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Path of the plugin executable to launch.
    plugin_path: Option<Utf8PathBuf>,
    /// `tracing` filter expression.
    log_filter: Option<String>,
    /// Log output format.
    log_format: Option<LogFormat>,
    /// Milliseconds the plugin has to complete the handshake.
    start_timeout_ms: Option<u64>,
    /// Milliseconds the plugin has to exit after SIGTERM.
    kill_timeout_ms: Option<u64>,
    /// Upper bound for a single RPC call in milliseconds.
    call_timeout_ms: Option<u64>,
    /// Number of additions run by the throughput demonstration.
    iterations: Option<u32>,
    /// Keep the plugin running until a shutdown signal arrives.
    hold: Option<bool>,
}

impl Config {
    /// Overrides the plugin executable path.
    #[must_use]
    pub fn with_plugin_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.plugin_path = Some(path.into());
        self
    }

    /// Overrides the number of demonstration iterations.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout_ms(mut self, millis: u64) -> Self {
        self.call_timeout_ms = Some(millis);
        self
    }

    /// Returns the plugin executable path.
    #[must_use]
    pub fn plugin_path(&self) -> Utf8PathBuf {
        self.plugin_path.clone().unwrap_or_else(default_plugin_path)
    }

    /// Returns the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Returns the configured log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        self.start_timeout_ms
            .map_or(DEFAULT_START_TIMEOUT, Duration::from_millis)
    }

    /// Returns the grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout_ms
            .map_or(DEFAULT_KILL_TIMEOUT, Duration::from_millis)
    }

    /// Returns the per-call timeout, if one is configured.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the number of demonstration iterations.
    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations.unwrap_or(DEFAULT_ITERATIONS)
    }

    /// Returns whether the host waits for a shutdown signal after the demo.
    #[must_use]
    pub fn hold(&self) -> bool {
        self.hold.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests;
