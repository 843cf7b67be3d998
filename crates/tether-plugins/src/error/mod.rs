//! Domain errors raised by the plugin framework.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O and JSON errors are wrapped in
//! `Arc` to keep the enums small and cheap to clone into log events.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::capability::ContractId;
use crate::handshake::HandshakeError;
use crate::protocol::{ErrorKind, MethodNameError, RemoteError};
use crate::supervisor::SupervisorState;
use crate::transport::TransportError;

/// Errors arising from plugin lifecycle and dispatch operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin executable could not be spawned.
    #[error("plugin '{executable}' failed to start: {source}")]
    Spawn {
        /// Executable that was launched.
        executable: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// `start` was called on a supervisor that already left `NotStarted`.
    #[error("plugin supervisor has already been started")]
    AlreadyStarted,

    /// A capability was requested before the handshake completed or after
    /// the plugin exited.
    #[error("plugin is not ready to dispense capabilities (state: {state})")]
    NotReady {
        /// Supervisor state observed at dispense time.
        state: SupervisorState,
    },

    /// The capability is not configured or was not advertised by the plugin.
    #[error("capability '{name}' is not available from this plugin")]
    UnknownCapability {
        /// Requested capability name.
        name: String,
    },

    /// The plugin does not implement the invoked method.
    #[error("plugin does not implement method '{method}'")]
    UnknownMethod {
        /// Dotted method identifier.
        method: String,
    },

    /// The plugin advertised a contract the host cannot use.
    #[error("capability '{name}' expects contract {expected} but plugin advertised {advertised}")]
    IncompatibleContract {
        /// Capability name.
        name: String,
        /// Contract and version the host expects.
        expected: String,
        /// Contract and version the plugin advertised.
        advertised: String,
    },

    /// Registering a local capability failed.
    #[error("capability registration failed: {message}")]
    Registration {
        /// Description of the rejected registration.
        message: String,
    },

    /// A method identifier failed validation.
    #[error(transparent)]
    InvalidMethod(#[from] MethodNameError),

    /// The plugin answered the call with an application error.
    #[error("plugin returned an error: {0}")]
    Remote(RemoteError),

    /// A record could not be encoded for the wire.
    #[error("failed to encode {what}: {source}")]
    Serialize {
        /// Name of the record being encoded.
        what: &'static str,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A record received from the wire could not be decoded.
    #[error("failed to decode {what}: {source}")]
    Deserialize {
        /// Name of the record being decoded.
        what: &'static str,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Handshake negotiation failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The RPC channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PluginError {
    /// Builds an [`PluginError::IncompatibleContract`] from the expected and
    /// advertised contract identities.
    pub(crate) fn incompatible_contract(
        name: &str,
        expected: (ContractId, impl std::fmt::Display),
        advertised: (ContractId, impl std::fmt::Display),
    ) -> Self {
        Self::IncompatibleContract {
            name: name.to_owned(),
            expected: format!("{}@{}", expected.0, expected.1),
            advertised: format!("{}@{}", advertised.0, advertised.1),
        }
    }

    /// Classifies the error into the wire taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCapability { .. } => ErrorKind::UnknownCapability,
            Self::UnknownMethod { .. } | Self::InvalidMethod(_) => ErrorKind::UnknownMethod,
            Self::Remote(remote) => remote.kind,
            Self::Deserialize { .. } => ErrorKind::InvalidRequest,
            Self::Spawn { .. }
            | Self::AlreadyStarted
            | Self::NotReady { .. }
            | Self::IncompatibleContract { .. }
            | Self::Registration { .. }
            | Self::Serialize { .. }
            | Self::Handshake(_)
            | Self::Transport(_) => ErrorKind::Internal,
        }
    }

    /// Returns the transport failure when the error came from the RPC channel.
    #[must_use]
    pub const fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(error) => Some(error),
            _ => None,
        }
    }
}
