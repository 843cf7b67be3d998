//! Calculator plugin for the Tether plugin framework.
//!
//! [`CalculatorImpl`] is a four-function calculator with an explicit
//! lifecycle: arithmetic is only accepted between `Initialize` and
//! `Shutdown`. [`run`] serves it as the `calculator` capability to the host
//! that launched this process.

#[cfg(test)]
mod tests;

use std::num::FpCategory;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use tether_config::{DEFAULT_LOG_FILTER, LogFormat, PLUGIN_LOG_FILTER_ENV};
use tether_plugins::capability::CalculatorOperation;
use tether_plugins::telemetry::{self, TelemetryError};
use tether_plugins::{
    CALCULATOR_CAPABILITY, CALCULATOR_HANDSHAKE, Calculator, CalculatorError, CalculatorStub,
    LifecycleState, LocalRegistry, PluginError, ServeError, StatusResponse,
};

const CALCULATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::calculator");

/// Version reported by `GetStatus`.
pub const CALCULATOR_VERSION: &str = "1.0.0";

#[derive(Debug, Default)]
struct Lifecycle {
    state: LifecycleState,
    started: Option<Started>,
}

#[derive(Debug, Clone, Copy)]
struct Started {
    at: Instant,
    wall_clock: OffsetDateTime,
}

/// Thread-safe calculator that enforces the lifecycle.
///
/// Arithmetic calls share a read lock and run concurrently; `initialize` and
/// `shutdown` take the write lock.
#[derive(Debug, Default)]
pub struct CalculatorImpl {
    lifecycle: RwLock<Lifecycle>,
}

impl CalculatorImpl {
    /// Creates an uninitialized calculator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn compute(
        &self,
        operation: CalculatorOperation,
        apply: impl FnOnce() -> Result<f64, CalculatorError>,
    ) -> Result<f64, CalculatorError> {
        let lifecycle = self.read();
        if lifecycle.state != LifecycleState::Initialized {
            return Err(CalculatorError::NotInitialized);
        }
        let result = apply()?;
        if !result.is_finite() {
            return Err(CalculatorError::NonFiniteResult { operation });
        }
        debug!(target: CALCULATOR_TARGET, %operation, result, "computed");
        Ok(result)
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "the calculator exists to perform floating-point arithmetic"
)]
impl Calculator for CalculatorImpl {
    fn initialize(&self) -> Result<(), CalculatorError> {
        let mut lifecycle = self.write();
        match lifecycle.state {
            LifecycleState::Initialized => Err(CalculatorError::AlreadyInitialized),
            LifecycleState::ShutDown => Err(CalculatorError::ShutDown),
            LifecycleState::Uninitialized => {
                lifecycle.state = LifecycleState::Initialized;
                lifecycle.started = Some(Started {
                    at: Instant::now(),
                    wall_clock: OffsetDateTime::now_utc(),
                });
                info!(target: CALCULATOR_TARGET, "calculator initialized");
                Ok(())
            }
        }
    }

    fn add(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.compute(CalculatorOperation::Add, || Ok(a + b))
    }

    fn subtract(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.compute(CalculatorOperation::Subtract, || Ok(a - b))
    }

    fn multiply(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.compute(CalculatorOperation::Multiply, || Ok(a * b))
    }

    fn divide(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.compute(CalculatorOperation::Divide, || {
            if b.classify() == FpCategory::Zero {
                return Err(CalculatorError::DivisionByZero);
            }
            Ok(a / b)
        })
    }

    fn status(&self) -> Result<StatusResponse, CalculatorError> {
        let lifecycle = self.read();
        let initialized = lifecycle.state == LifecycleState::Initialized;
        let message = match (lifecycle.state, lifecycle.started) {
            (LifecycleState::Initialized, Some(started)) => {
                format!("running for {}s", rounded_seconds(started.at.elapsed()))
            }
            (state, _) => state.to_string(),
        };
        Ok(StatusResponse {
            status: lifecycle.state,
            version: CALCULATOR_VERSION.to_owned(),
            initialized,
            message,
            started_at: lifecycle
                .started
                .and_then(|started| started.wall_clock.format(&Rfc3339).ok()),
        })
    }

    fn shutdown(&self) -> Result<(), CalculatorError> {
        let mut lifecycle = self.write();
        match lifecycle.state {
            LifecycleState::Uninitialized => Err(CalculatorError::NotInitialized),
            LifecycleState::ShutDown => Err(CalculatorError::ShutDown),
            LifecycleState::Initialized => {
                lifecycle.state = LifecycleState::ShutDown;
                info!(target: CALCULATOR_TARGET, "calculator shut down");
                Ok(())
            }
        }
    }
}

/// Uptime rounded to the nearest whole second.
fn rounded_seconds(uptime: Duration) -> u64 {
    uptime.as_secs() + u64::from(uptime.subsec_millis() >= 500)
}

/// Registry serving a fresh [`CalculatorImpl`] as `calculator`.
///
/// # Errors
///
/// Returns [`PluginError::Registration`] if the capability name is rejected.
pub fn registry() -> Result<LocalRegistry, PluginError> {
    let mut registry = LocalRegistry::new();
    registry.register_local(
        CALCULATOR_CAPABILITY,
        Arc::new(CalculatorStub::new(CalculatorImpl::new())),
    )?;
    Ok(registry)
}

/// Failures that end the plugin process.
#[derive(Debug, Error)]
pub enum PluginMainError {
    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The calculator could not be registered.
    #[error(transparent)]
    Registration(#[from] PluginError),
    /// The binary was started by hand rather than by its host.
    #[error(
        "this binary is a plugin and is not meant to be executed directly; \
         run the program that uses it, which launches plugins automatically"
    )]
    NotLaunchedByHost,
    /// Serving the host failed.
    #[error(transparent)]
    Serve(ServeError),
}

impl From<ServeError> for PluginMainError {
    fn from(error: ServeError) -> Self {
        if error.is_not_launched_by_host() {
            Self::NotLaunchedByHost
        } else {
            Self::Serve(error)
        }
    }
}

/// Runs the plugin: installs telemetry, then serves the calculator to the
/// launching host until it disconnects.
///
/// # Errors
///
/// Returns [`PluginMainError`] when the process was not launched by a host or
/// serving fails.
pub fn run() -> Result<(), PluginMainError> {
    let filter = std::env::var(PLUGIN_LOG_FILTER_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    telemetry::initialise(&filter, LogFormat::Json)?;
    tether_plugins::serve(&CALCULATOR_HANDSHAKE, registry()?)?;
    info!(target: CALCULATOR_TARGET, "host disconnected; exiting");
    Ok(())
}
