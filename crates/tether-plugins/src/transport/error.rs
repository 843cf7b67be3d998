use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Failures of the RPC channel.
///
/// The error is `Clone` so one failure can be delivered to every caller
/// blocked on the channel and to every later caller.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport was closed by its owner.
    #[error("plugin transport is closed")]
    Closed,
    /// The host began shutting the plugin down.
    #[error("plugin is shutting down")]
    ShuttingDown,
    /// The plugin process exited.
    #[error("plugin process exited")]
    ProcessExited,
    /// The plugin closed its end of the connection.
    #[error("plugin closed the connection")]
    ConnectionClosed,
    /// No response arrived within the call timeout.
    #[error("call to '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Configured timeout.
        timeout_ms: u64,
    },
    /// Connecting to the advertised endpoint failed.
    #[error("failed to connect to plugin at {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Reading or writing the connection failed.
    #[error("plugin transport I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
    /// The peer violated the envelope protocol.
    #[error("plugin protocol violation: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}
