//! Error type for the host runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tether_plugins::shutdown::ShutdownError;
use tether_plugins::telemetry::TelemetryError;
use tether_plugins::{CalculatorError, PluginError};

/// Failures that end a host run with a non-zero exit status.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The plugin could not be launched or dispensed.
    #[error("plugin failed: {0}")]
    Plugin(#[from] PluginError),
    /// A calculator call failed unexpectedly.
    #[error("calculator call failed: {0}")]
    Calculator(#[from] CalculatorError),
    /// Results could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    /// The shutdown signal listener failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}
