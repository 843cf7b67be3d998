//! Capability contracts known to the framework.
//!
//! A capability contract is a named, versioned set of operations. Contracts
//! form the closed set [`ContractId`]; each has a static
//! [`ContractDescriptor`] listing its operations in order. Dispensing a
//! capability on the host yields a [`Capability`], a tagged union over the
//! typed remote proxies.

pub mod calculator;


use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PluginError;
use crate::protocol::ErrorKind;

pub use self::calculator::{
    CALCULATOR_CAPABILITY, CALCULATOR_CONTRACT, CALCULATOR_CONTRACT_VERSION, CALCULATOR_HANDSHAKE,
    CalculationRequest, CalculationResponse, Calculator, CalculatorError, CalculatorOperation,
    CalculatorProxy, CalculatorStub, LifecycleState, StatusResponse,
};

/// Identifies a capability contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractId {
    /// Four-function calculator with an explicit lifecycle.
    Calculator,
}

impl ContractId {
    /// Returns the canonical kebab-case name of the contract.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
        }
    }

    /// Returns the static descriptor of the contract.
    #[must_use]
    pub const fn descriptor(self) -> &'static ContractDescriptor {
        match self {
            Self::Calculator => &CALCULATOR_CONTRACT,
        }
    }

    /// Returns the contract version implemented by this build.
    #[must_use]
    pub const fn version(self) -> ContractVersion {
        self.descriptor().version
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version of a capability contract.
///
/// A major bump is a breaking change; a minor bump is additive. Two
/// versions are compatible when they share the same major number. On the
/// wire the version is the string `"major.minor"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractVersion {
    major: u16,
    minor: u16,
}

impl ContractVersion {
    /// Creates a new contract version.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Returns the major version number.
    #[must_use]
    pub const fn major(self) -> u16 {
        self.major
    }

    /// Returns the minor version number.
    #[must_use]
    pub const fn minor(self) -> u16 {
        self.minor
    }

    /// Returns `true` if `other` shares this major version.
    #[must_use]
    pub const fn is_compatible_with(self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ContractVersion {
    type Err = ContractVersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ContractVersionError(input.to_owned());
        let (major, minor) = input.split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            major.parse().map_err(|_| invalid())?,
            minor.parse().map_err(|_| invalid())?,
        ))
    }
}

impl TryFrom<String> for ContractVersion {
    type Error = ContractVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContractVersion> for String {
    fn from(value: ContractVersion) -> Self {
        value.to_string()
    }
}

/// A contract version string was not `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract version '{0}' must have the form major.minor")]
pub struct ContractVersionError(String);

/// Static description of a contract.
#[derive(Debug, PartialEq, Eq)]
pub struct ContractDescriptor {
    /// Contract identity.
    pub id: ContractId,
    /// Contract version.
    pub version: ContractVersion,
    /// Operations in declaration order.
    pub operations: &'static [OperationDescriptor],
}

impl ContractDescriptor {
    /// Looks up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&'static OperationDescriptor> {
        self.operations.iter().find(|operation| operation.name == name)
    }
}

/// Static description of one contract operation.
#[derive(Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Operation name as used in method ids.
    pub name: &'static str,
    /// Name of the request record.
    pub request: &'static str,
    /// Name of the response record.
    pub response: &'static str,
    /// Failure classes the operation may report.
    pub failures: &'static [ErrorKind],
}

/// Capability-level shutdown run by the host before the plugin is killed.
pub trait GracefulShutdown: Send + Sync {
    /// Asks the capability to release its resources.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the capability or the transport.
    fn shutdown(&self) -> Result<(), PluginError>;
}

/// A dispensed capability.
#[derive(Debug, Clone)]
pub enum Capability {
    /// Remote calculator.
    Calculator(CalculatorProxy),
}

impl Capability {
    /// Contract implemented by the capability.
    #[must_use]
    pub const fn contract(&self) -> ContractId {
        match self {
            Self::Calculator(_) => ContractId::Calculator,
        }
    }

    /// Name the capability was dispensed under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Calculator(proxy) => proxy.name(),
        }
    }

    /// Unwraps the calculator proxy.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::IncompatibleContract`] when the capability
    /// implements another contract.
    pub fn into_calculator(self) -> Result<CalculatorProxy, PluginError> {
        match self {
            Self::Calculator(proxy) => Ok(proxy),
        }
    }
}

impl GracefulShutdown for Capability {
    fn shutdown(&self) -> Result<(), PluginError> {
        match self {
            Self::Calculator(proxy) => GracefulShutdown::shutdown(proxy),
        }
    }
}
