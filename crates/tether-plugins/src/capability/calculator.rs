//! The calculator contract: typed records, error mapping, remote proxy and
//! server stub.
//!
//! [`CalculatorProxy`] is what the host holds after dispensing the
//! `calculator` capability; every [`Calculator`] method becomes one call on
//! `calculator.<Operation>`. On the plugin side [`CalculatorStub`] decodes
//! those calls and drives a local [`Calculator`] implementation.

use std::sync::Weak;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{ContractDescriptor, ContractId, ContractVersion, GracefulShutdown, OperationDescriptor};
use crate::broker::ServerStub;
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::protocol::{self, Empty, ErrorKind, MethodName, RemoteError, validate_segment};
use crate::transport::{Transport, TransportError};

/// Capability name the calculator is registered and dispensed under.
pub const CALCULATOR_CAPABILITY: &str = "calculator";

/// Version of the calculator contract.
pub const CALCULATOR_CONTRACT_VERSION: ContractVersion = ContractVersion::new(1, 0);

/// Handshake shared by the calculator host and plugin.
pub const CALCULATOR_HANDSHAKE: HandshakeConfig =
    HandshakeConfig::new(1, "CALCULATOR_PLUGIN", "calculator_example");

const LIFECYCLE: &[ErrorKind] = &[ErrorKind::Capability];
const ARITHMETIC: &[ErrorKind] = &[ErrorKind::Capability, ErrorKind::Computation];

/// Descriptor of the calculator contract.
pub const CALCULATOR_CONTRACT: ContractDescriptor = ContractDescriptor {
    id: ContractId::Calculator,
    version: CALCULATOR_CONTRACT_VERSION,
    operations: &[
        OperationDescriptor {
            name: "Initialize",
            request: "Empty",
            response: "Empty",
            failures: LIFECYCLE,
        },
        OperationDescriptor {
            name: "Add",
            request: "CalculationRequest",
            response: "CalculationResponse",
            failures: ARITHMETIC,
        },
        OperationDescriptor {
            name: "Subtract",
            request: "CalculationRequest",
            response: "CalculationResponse",
            failures: ARITHMETIC,
        },
        OperationDescriptor {
            name: "Multiply",
            request: "CalculationRequest",
            response: "CalculationResponse",
            failures: ARITHMETIC,
        },
        OperationDescriptor {
            name: "Divide",
            request: "CalculationRequest",
            response: "CalculationResponse",
            failures: ARITHMETIC,
        },
        OperationDescriptor {
            name: "GetStatus",
            request: "Empty",
            response: "StatusResponse",
            failures: &[],
        },
        OperationDescriptor {
            name: "Shutdown",
            request: "Empty",
            response: "Empty",
            failures: LIFECYCLE,
        },
    ],
};

/// Operations of the calculator contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum CalculatorOperation {
    /// Move to the initialized state.
    Initialize,
    /// `a + b`.
    Add,
    /// `a - b`.
    Subtract,
    /// `a * b`.
    Multiply,
    /// `a / b`.
    Divide,
    /// Report lifecycle state and uptime.
    GetStatus,
    /// Move to the terminal shut-down state.
    Shutdown,
}

impl CalculatorOperation {
    /// Operation name as used in method ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "Initialize",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::GetStatus => "GetStatus",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Operands of a binary arithmetic operation.
///
/// Finite operands travel as JSON numbers. JSON has no literal for the
/// others, so infinities travel as `"inf"`/`"-inf"` and NaN as `"NaN"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequest {
    /// Left operand.
    #[serde(with = "wire_float")]
    pub a: f64,
    /// Right operand.
    #[serde(with = "wire_float")]
    pub b: f64,
}

mod wire_float {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    const POSITIVE_INFINITY: &str = "inf";
    const NEGATIVE_INFINITY: &str = "-inf";
    const NOT_A_NUMBER: &str = "NaN";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireFloat {
        Number(f64),
        Text(String),
    }

    #[expect(
        clippy::trivially_copy_pass_by_ref,
        reason = "serde's `with` contract passes fields by reference"
    )]
    pub(super) fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str(NOT_A_NUMBER)
        } else if value.is_sign_positive() {
            serializer.serialize_str(POSITIVE_INFINITY)
        } else {
            serializer.serialize_str(NEGATIVE_INFINITY)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match WireFloat::deserialize(deserializer)? {
            WireFloat::Number(value) => Ok(value),
            WireFloat::Text(text) => match text.as_str() {
                POSITIVE_INFINITY => Ok(f64::INFINITY),
                NEGATIVE_INFINITY => Ok(f64::NEG_INFINITY),
                NOT_A_NUMBER => Ok(f64::NAN),
                other => Err(D::Error::custom(format!(
                    "expected a number, \"{POSITIVE_INFINITY}\", \"{NEGATIVE_INFINITY}\" or \"{NOT_A_NUMBER}\", found \"{other}\""
                ))),
            },
        }
    }
}

/// Result of a binary arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalculationResponse {
    /// Computed value.
    pub result: f64,
}

/// Lifecycle of a calculator instance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// Created but not yet initialized.
    #[default]
    Uninitialized,
    /// Accepting arithmetic calls.
    Initialized,
    /// Terminal state.
    ShutDown,
}

/// Snapshot reported by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Current lifecycle state.
    pub status: LifecycleState,
    /// Implementation version.
    pub version: String,
    /// Whether arithmetic calls are currently accepted.
    pub initialized: bool,
    /// Human-readable summary.
    pub message: String,
    /// RFC 3339 timestamp of initialization, if it happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// The calculator contract.
///
/// Implementations must be usable from many threads at once.
pub trait Calculator: Send + Sync {
    /// Moves the calculator into the initialized state.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::AlreadyInitialized`] or [`CalculatorError::ShutDown`]
    /// depending on the current state.
    fn initialize(&self) -> Result<(), CalculatorError>;

    /// Returns `a + b`.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::NotInitialized`] outside the initialized state.
    fn add(&self, a: f64, b: f64) -> Result<f64, CalculatorError>;

    /// Returns `a - b`.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::NotInitialized`] outside the initialized state.
    fn subtract(&self, a: f64, b: f64) -> Result<f64, CalculatorError>;

    /// Returns `a * b`.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::NotInitialized`] outside the initialized state.
    fn multiply(&self, a: f64, b: f64) -> Result<f64, CalculatorError>;

    /// Returns `a / b`.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::DivisionByZero`] when `b` is zero and
    /// [`CalculatorError::NonFiniteResult`] when the quotient overflows.
    fn divide(&self, a: f64, b: f64) -> Result<f64, CalculatorError>;

    /// Reports the lifecycle state.
    ///
    /// # Errors
    ///
    /// Only transport failures when called through a proxy.
    fn status(&self) -> Result<StatusResponse, CalculatorError>;

    /// Moves the calculator into its terminal state.
    ///
    /// # Errors
    ///
    /// [`CalculatorError::NotInitialized`] or [`CalculatorError::ShutDown`]
    /// depending on the current state.
    fn shutdown(&self) -> Result<(), CalculatorError>;
}

const NOT_INITIALIZED: &str = "not_initialized";
const ALREADY_INITIALIZED: &str = "already_initialized";
const SHUT_DOWN: &str = "shut_down";
const DIVISION_BY_ZERO: &str = "division_by_zero";
const NON_FINITE_RESULT: &str = "non_finite_result";

/// Failures of calculator operations.
#[derive(Debug, Error)]
pub enum CalculatorError {
    /// The calculator is not in the initialized state.
    #[error("calculator is not initialized")]
    NotInitialized,
    /// `initialize` was called twice.
    #[error("calculator is already initialized")]
    AlreadyInitialized,
    /// The calculator has been shut down.
    #[error("calculator has been shut down")]
    ShutDown,
    /// The divisor was zero.
    #[error("division by zero")]
    DivisionByZero,
    /// The operation overflowed to infinity or produced NaN.
    #[error("{operation} produced a non-finite result")]
    NonFiniteResult {
        /// Operation that overflowed.
        operation: CalculatorOperation,
    },
    /// The call failed in the framework rather than in the calculator.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl CalculatorError {
    /// Classifies the error into the wire taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized | Self::AlreadyInitialized | Self::ShutDown => {
                ErrorKind::Capability
            }
            Self::DivisionByZero | Self::NonFiniteResult { .. } => ErrorKind::Computation,
            Self::Plugin(error) => error.kind(),
        }
    }

    /// Stable wire code of the error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::NotInitialized => NOT_INITIALIZED,
            Self::AlreadyInitialized => ALREADY_INITIALIZED,
            Self::ShutDown => SHUT_DOWN,
            Self::DivisionByZero => DIVISION_BY_ZERO,
            Self::NonFiniteResult { .. } => NON_FINITE_RESULT,
            Self::Plugin(PluginError::Remote(remote)) => &remote.code,
            Self::Plugin(_) => "internal",
        }
    }

    /// Encodes the error for the wire.
    #[must_use]
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::Plugin(PluginError::Remote(remote)) => remote.clone(),
            other => RemoteError::new(other.kind(), other.code(), other.to_string()),
        }
    }

    /// Decodes a wire error produced by [`CalculatorError::to_remote`].
    ///
    /// Codes outside the calculator taxonomy stay wrapped as
    /// [`PluginError::Remote`].
    #[must_use]
    pub fn from_remote(remote: RemoteError, operation: CalculatorOperation) -> Self {
        match (remote.kind, remote.code.as_str()) {
            (ErrorKind::Capability, NOT_INITIALIZED) => Self::NotInitialized,
            (ErrorKind::Capability, ALREADY_INITIALIZED) => Self::AlreadyInitialized,
            (ErrorKind::Capability, SHUT_DOWN) => Self::ShutDown,
            (ErrorKind::Computation, DIVISION_BY_ZERO) => Self::DivisionByZero,
            (ErrorKind::Computation, NON_FINITE_RESULT) => Self::NonFiniteResult { operation },
            _ => Self::Plugin(PluginError::Remote(remote)),
        }
    }

    /// Returns `true` when the failure came from the framework.
    #[must_use]
    pub const fn is_plugin_failure(&self) -> bool {
        matches!(self, Self::Plugin(_))
    }
}

/// Host-side proxy forwarding [`Calculator`] calls over the transport.
///
/// The proxy does not own the transport; once the plugin is gone every call
/// fails with a transport error.
#[derive(Clone)]
pub struct CalculatorProxy {
    name: String,
    transport: Weak<dyn Transport>,
}

impl std::fmt::Debug for CalculatorProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatorProxy")
            .field("name", &self.name)
            .field("connected", &(self.transport.strong_count() > 0))
            .finish()
    }
}

impl CalculatorProxy {
    /// Binds a proxy for the capability `name` to a transport.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidMethod`] when `name` cannot prefix a
    /// method id.
    pub fn new(name: impl Into<String>, transport: Weak<dyn Transport>) -> Result<Self, PluginError> {
        let name = name.into();
        validate_segment(&name, "capability")?;
        Ok(Self { name, transport })
    }

    /// Capability name used as the method prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke<Req, Resp>(
        &self,
        operation: CalculatorOperation,
        request: &Req,
    ) -> Result<Resp, CalculatorError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let transport = self
            .transport
            .upgrade()
            .ok_or(PluginError::Transport(TransportError::Closed))?;
        let method =
            MethodName::new(self.name.as_str(), operation.as_str()).map_err(PluginError::from)?;
        let payload = protocol::encode("calculator request", request)?;
        match transport.call(&method, payload) {
            Ok(value) => Ok(protocol::decode("calculator response", value)?),
            Err(PluginError::Remote(remote)) => Err(CalculatorError::from_remote(remote, operation)),
            Err(other) => Err(CalculatorError::Plugin(other)),
        }
    }

    fn calculate(
        &self,
        operation: CalculatorOperation,
        a: f64,
        b: f64,
    ) -> Result<f64, CalculatorError> {
        let response: CalculationResponse = self.invoke(operation, &CalculationRequest { a, b })?;
        Ok(response.result)
    }
}

impl Calculator for CalculatorProxy {
    fn initialize(&self) -> Result<(), CalculatorError> {
        self.invoke::<_, Empty>(CalculatorOperation::Initialize, &Empty {})
            .map(drop)
    }

    fn add(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.calculate(CalculatorOperation::Add, a, b)
    }

    fn subtract(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.calculate(CalculatorOperation::Subtract, a, b)
    }

    fn multiply(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.calculate(CalculatorOperation::Multiply, a, b)
    }

    fn divide(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.calculate(CalculatorOperation::Divide, a, b)
    }

    fn status(&self) -> Result<StatusResponse, CalculatorError> {
        self.invoke(CalculatorOperation::GetStatus, &Empty {})
    }

    fn shutdown(&self) -> Result<(), CalculatorError> {
        self.invoke::<_, Empty>(CalculatorOperation::Shutdown, &Empty {})
            .map(drop)
    }
}

impl GracefulShutdown for CalculatorProxy {
    fn shutdown(&self) -> Result<(), PluginError> {
        match Calculator::shutdown(self) {
            Ok(()) => Ok(()),
            Err(CalculatorError::Plugin(error)) => Err(error),
            Err(other) => Err(PluginError::Remote(other.to_remote())),
        }
    }
}

/// Plugin-side stub serving a local [`Calculator`].
#[derive(Debug)]
pub struct CalculatorStub<C> {
    calculator: C,
}

impl<C: Calculator> CalculatorStub<C> {
    /// Wraps a calculator implementation.
    #[must_use]
    pub const fn new(calculator: C) -> Self {
        Self { calculator }
    }

    /// Returns the wrapped implementation.
    #[must_use]
    pub const fn calculator(&self) -> &C {
        &self.calculator
    }

    fn calculate(
        &self,
        payload: Value,
        operation: impl FnOnce(&C, f64, f64) -> Result<f64, CalculatorError>,
    ) -> Result<Value, RemoteError> {
        let request: CalculationRequest = decode_request(payload)?;
        let result = operation(&self.calculator, request.a, request.b)
            .map_err(|error| error.to_remote())?;
        encode_response(&CalculationResponse { result })
    }

    fn lifecycle(
        &self,
        payload: Value,
        transition: impl FnOnce(&C) -> Result<(), CalculatorError>,
    ) -> Result<Value, RemoteError> {
        decode_request::<Empty>(payload)?;
        transition(&self.calculator).map_err(|error| error.to_remote())?;
        encode_response(&Empty {})
    }
}

impl<C: Calculator> ServerStub for CalculatorStub<C> {
    fn contract(&self) -> ContractId {
        ContractId::Calculator
    }

    fn invoke(&self, operation: &str, payload: Value) -> Result<Value, RemoteError> {
        let known = operation
            .parse::<CalculatorOperation>()
            .map_err(|_| RemoteError::unknown_method(operation))?;
        match known {
            CalculatorOperation::Initialize => self.lifecycle(payload, C::initialize),
            CalculatorOperation::Add => self.calculate(payload, C::add),
            CalculatorOperation::Subtract => self.calculate(payload, C::subtract),
            CalculatorOperation::Multiply => self.calculate(payload, C::multiply),
            CalculatorOperation::Divide => self.calculate(payload, C::divide),
            CalculatorOperation::GetStatus => {
                decode_request::<Empty>(payload)?;
                let status = self.calculator.status().map_err(|error| error.to_remote())?;
                encode_response(&status)
            }
            CalculatorOperation::Shutdown => self.lifecycle(payload, C::shutdown),
        }
    }
}

fn decode_request<T: DeserializeOwned>(payload: Value) -> Result<T, RemoteError> {
    protocol::decode("calculator request", payload)
        .map_err(|error| RemoteError::invalid_request(error.to_string()))
}

fn encode_response<T: Serialize>(response: &T) -> Result<Value, RemoteError> {
    protocol::encode("calculator response", response)
        .map_err(|error| RemoteError::internal(error.to_string()))
}
