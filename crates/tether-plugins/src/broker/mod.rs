//! Capability brokering.
//!
//! On the host, [`CapabilityBroker`] turns a capability name into a typed
//! remote proxy bound to a plugin connection. On the plugin,
//! [`LocalRegistry`] maps capability names to server stubs and routes
//! incoming calls to them.

mod registry;


use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::capability::{CALCULATOR_CAPABILITY, CalculatorProxy, Capability, ContractId};
use crate::error::PluginError;
use crate::handshake::Negotiated;
use crate::supervisor::SupervisorState;
use crate::transport::Transport;

pub use self::registry::{LocalRegistry, ServerStub};

const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

/// View of a plugin connection needed to dispense capabilities.
pub trait Connection: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> SupervisorState;

    /// Handshake result, once negotiated.
    fn negotiated(&self) -> Option<Negotiated>;

    /// The shared RPC transport, once connected.
    fn transport(&self) -> Option<Arc<dyn Transport>>;

    /// Records that a capability has been handed out.
    fn mark_running(&self);
}

/// Capability names a host expects from a plugin, with their contracts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSet {
    entries: BTreeMap<String, ContractId>,
}

impl PluginSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The set containing only the calculator capability.
    #[must_use]
    pub fn calculator() -> Self {
        Self::new().with(CALCULATOR_CAPABILITY, ContractId::Calculator)
    }

    /// Adds or replaces an entry.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, contract: ContractId) -> Self {
        self.entries.insert(name.into(), contract);
        self
    }

    /// Contract expected for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ContractId> {
        self.entries.get(name).copied()
    }

    /// Iterates over the configured names and contracts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ContractId)> {
        self.entries
            .iter()
            .map(|(name, contract)| (name.as_str(), *contract))
    }
}

/// Resolves capability names into remote proxies.
#[derive(Debug, Clone)]
pub struct CapabilityBroker {
    plugins: PluginSet,
}

impl CapabilityBroker {
    /// Creates a broker for the given plugin set.
    #[must_use]
    pub const fn new(plugins: PluginSet) -> Self {
        Self { plugins }
    }

    /// Configured plugin set.
    #[must_use]
    pub const fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Dispenses the capability `name` from `connection`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::NotReady`] unless the connection is `Ready` or
    ///   `Running`;
    /// - [`PluginError::UnknownCapability`] when `name` is not configured or
    ///   was not advertised;
    /// - [`PluginError::IncompatibleContract`] when the advertised contract
    ///   differs or its major version does not match.
    pub fn dispense(
        &self,
        connection: &dyn Connection,
        name: &str,
    ) -> Result<Capability, PluginError> {
        let state = connection.state();
        if !state.is_alive() {
            return Err(PluginError::NotReady { state });
        }
        let expected = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::UnknownCapability {
                name: name.to_owned(),
            })?;
        let negotiated = connection
            .negotiated()
            .ok_or(PluginError::NotReady { state })?;
        let advertised =
            negotiated
                .capability(name)
                .ok_or_else(|| PluginError::UnknownCapability {
                    name: name.to_owned(),
                })?;
        if advertised.contract != expected
            || !advertised.version.is_compatible_with(&expected.version())
        {
            return Err(PluginError::incompatible_contract(
                name,
                (expected, expected.version()),
                (advertised.contract, advertised.version),
            ));
        }
        let transport = connection
            .transport()
            .ok_or(PluginError::NotReady { state })?;

        let capability = match expected {
            ContractId::Calculator => {
                Capability::Calculator(CalculatorProxy::new(name, Arc::downgrade(&transport))?)
            }
        };
        connection.mark_running();
        debug!(
            target: BROKER_TARGET,
            capability = name,
            contract = %expected,
            version = %advertised.version,
            "capability dispensed"
        );
        Ok(capability)
    }
}
