//! Plugin lifecycle and RPC dispatch framework.
//!
//! A host process launches a plugin executable, verifies its identity with a
//! one-line handshake, connects to the socket the plugin announces, and hands
//! out typed proxies for the capabilities the plugin serves. Calls travel as
//! JSONL envelopes and may be issued from many threads at once; every call is
//! correlated by id and answered independently.
//!
//! Plugins are not meant to be run directly. A plugin that does not find the
//! magic cookie in its environment refuses to start, which keeps an operator
//! from mistaking it for an ordinary command.
//!
//! # Architecture
//!
//! The host side is layered:
//!
//! - [`Supervisor`] owns the child process and its lifecycle state, drives
//!   the handshake with a deadline, and kills the plugin on request or drop;
//! - [`RpcTransport`] multiplexes concurrent calls over one socket;
//! - [`CapabilityBroker`] checks the advertised contract and dispenses a
//!   proxy such as [`CalculatorProxy`];
//! - [`PluginClient`] ties these together and implements ordered shutdown.
//!
//! The plugin side registers [`ServerStub`] implementations in a
//! [`LocalRegistry`] and calls [`serve`], which validates the launch
//! environment, binds a listener, announces it on stdout and serves the
//! host's connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_plugins::{Calculator, ClientConfig, PluginClient};
//!
//! let client = PluginClient::launch(ClientConfig::calculator("/usr/libexec/calculator"))
//!     .expect("plugin starts");
//! let calculator = client.dispense_calculator().expect("calculator dispensed");
//! calculator.initialize().expect("initialized");
//! assert_eq!(calculator.add(10.0, 5.0).expect("sum"), 15.0);
//! client.shutdown();
//! ```

pub mod broker;
pub mod capability;
pub mod client;
pub mod error;
pub mod handshake;
pub mod process;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

#[cfg(all(test, unix))]
mod test_support;

#[cfg(test)]
mod tests;

pub use self::broker::{CapabilityBroker, Connection, LocalRegistry, PluginSet, ServerStub};
pub use self::capability::{
    CALCULATOR_CAPABILITY, CALCULATOR_HANDSHAKE, Calculator, CalculatorError, CalculatorProxy,
    CalculatorStub, Capability, ContractId, ContractVersion, GracefulShutdown, LifecycleState,
    StatusResponse,
};
pub use self::client::{ClientConfig, PluginClient, shutdown_on_signal};
pub use self::error::PluginError;
pub use self::handshake::{HandshakeConfig, HandshakeError, Negotiated};
pub use self::protocol::{ErrorKind, MethodName, RemoteError};
pub use self::server::{PluginServer, ServeError, serve};
pub use self::shutdown::{ShutdownError, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal};
pub use self::supervisor::{ExitReason, LaunchConfig, Supervisor, SupervisorState};
pub use self::transport::{RpcTransport, Transport, TransportError, TransportOptions};
