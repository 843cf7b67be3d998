use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::BROKER_TARGET;
use crate::capability::ContractId;
use crate::error::PluginError;
use crate::handshake::AdvertisedCapability;
use crate::protocol::{
    CallOutcome, CallRequest, CallResponse, ErrorKind, RemoteError, validate_segment,
};

/// Plugin-side adapter that executes calls against a local implementation.
pub trait ServerStub: Send + Sync {
    /// Contract the stub serves.
    fn contract(&self) -> ContractId;

    /// Executes `operation` with the decoded request payload.
    ///
    /// # Errors
    ///
    /// Returns the [`RemoteError`] to send back to the host.
    fn invoke(&self, operation: &str, payload: Value) -> Result<Value, RemoteError>;
}

/// Capabilities served by this plugin process.
#[derive(Default)]
pub struct LocalRegistry {
    stubs: BTreeMap<String, Arc<dyn ServerStub>>,
}

impl std::fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("capabilities", &self.stubs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stub under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Registration`] when the name is malformed or
    /// already registered.
    pub fn register_local(
        &mut self,
        name: impl Into<String>,
        stub: Arc<dyn ServerStub>,
    ) -> Result<(), PluginError> {
        let name = name.into();
        validate_segment(&name, "capability").map_err(|error| PluginError::Registration {
            message: error.to_string(),
        })?;
        if self.stubs.contains_key(&name) {
            return Err(PluginError::Registration {
                message: format!("capability '{name}' is already registered"),
            });
        }
        self.stubs.insert(name, stub);
        Ok(())
    }

    /// Returns `true` when no capabilities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Capability list announced in the handshake line, ordered by name.
    #[must_use]
    pub fn advertised(&self) -> Vec<AdvertisedCapability> {
        self.stubs
            .iter()
            .map(|(name, stub)| {
                let contract = stub.contract();
                AdvertisedCapability {
                    name: name.clone(),
                    contract,
                    version: contract.version(),
                }
            })
            .collect()
    }

    /// Routes a request to its stub and builds the response envelope.
    #[must_use]
    pub fn dispatch(&self, request: CallRequest) -> CallResponse {
        let CallRequest {
            id,
            method,
            payload,
        } = request;
        let outcome = match self.stubs.get(method.capability()) {
            Some(stub) => stub.invoke(method.operation(), payload),
            None => Err(RemoteError::new(
                ErrorKind::UnknownMethod,
                "unknown_capability",
                format!("no capability named '{}'", method.capability()),
            )),
        };
        match outcome {
            Ok(payload) => CallResponse {
                id,
                outcome: CallOutcome::Ok { payload },
            },
            Err(error) => {
                debug!(
                    target: BROKER_TARGET,
                    id,
                    %method,
                    kind = %error.kind,
                    code = %error.code,
                    "call failed"
                );
                CallResponse::error(id, error)
            }
        }
    }
}
