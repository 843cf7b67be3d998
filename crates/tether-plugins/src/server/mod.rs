//! Plugin side of the framework: handshake announcement and the request loop.
//!
//! A plugin binary calls [`serve`] with its registry. The host's single
//! connection is served until the host hangs up; each request runs on its
//! own scoped thread and responses are written under a shared lock, so a
//! slow operation never holds up the others.

mod listener;


use std::io::{self, BufReader, Write};
use std::sync::{Mutex, PoisonError};
use std::thread;

use serde_json::Value;
use tether_config::{Network, SocketEndpoint};
use thiserror::Error;
use tracing::{debug, info, warn};

use self::listener::PluginListener;
use crate::broker::LocalRegistry;
use crate::handshake::{
    self, HandshakeConfig, HandshakeError, HandshakeLine, negotiate_protocol_version,
    network_from_environment,
};
use crate::protocol::{self, CallRequest, CallResponse, MethodName, RemoteError};
use crate::transport::ConnectionStream;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Failures that stop a plugin from serving.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The launch environment was rejected.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The registry has nothing to serve.
    #[error("no capabilities are registered")]
    EmptyRegistry,
    /// The private socket directory could not be created.
    #[error("failed to create socket directory: {source}")]
    SocketDir {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The socket path is not valid UTF-8.
    #[error("socket path {path} is not valid UTF-8")]
    NonUtf8SocketPath {
        /// Lossy rendering of the path.
        path: String,
    },
    /// Binding the listener failed.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Endpoint being bound.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Accepting the host's connection failed.
    #[error("failed to accept host connection: {source}")]
    Accept {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The connection failed while serving.
    #[error("host connection failed: {source}")]
    Connection {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ServeError {
    /// Returns `true` when the binary was not launched by a host.
    #[must_use]
    pub const fn is_not_launched_by_host(&self) -> bool {
        matches!(
            self,
            Self::Handshake(HandshakeError::NotLaunchedByHost { .. })
        )
    }
}

/// Verifies the launch environment, announces the endpoint on stdout and
/// serves the host until it disconnects.
///
/// # Errors
///
/// Returns [`ServeError`] when the cookie is missing or wrong, no protocol
/// version is shared, or the socket fails.
pub fn serve(config: &HandshakeConfig, registry: LocalRegistry) -> Result<(), ServeError> {
    handshake::verify_launch_environment(config)?;
    let protocol_version = negotiate_protocol_version(config)?;
    let network = network_from_environment()?;
    let server = PluginServer::bind(config, protocol_version, network, registry)?;
    server.announce(io::stdout().lock())?;
    server.serve_one()
}

/// A bound plugin server that has not yet accepted its host.
#[derive(Debug)]
pub struct PluginServer {
    listener: PluginListener,
    registry: LocalRegistry,
    line: HandshakeLine,
}

impl PluginServer {
    /// Binds a listener on `network` and prepares the handshake line.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::EmptyRegistry`] for an empty registry, or the
    /// bind failure.
    pub fn bind(
        config: &HandshakeConfig,
        protocol_version: u32,
        network: Network,
        registry: LocalRegistry,
    ) -> Result<Self, ServeError> {
        if registry.is_empty() {
            return Err(ServeError::EmptyRegistry);
        }
        let listener = PluginListener::bind(network)?;
        let line = HandshakeLine::new(
            protocol_version,
            config.magic_cookie_value(),
            listener.endpoint(),
            registry.advertised(),
        );
        info!(
            target: SERVER_TARGET,
            endpoint = %listener.endpoint(),
            protocol_version,
            "plugin listening"
        );
        Ok(Self {
            listener,
            registry,
            line,
        })
    }

    /// Endpoint the host must connect to.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        self.listener.endpoint()
    }

    /// Handshake line announced to the host.
    #[must_use]
    pub const fn handshake_line(&self) -> &HandshakeLine {
        &self.line
    }

    /// Writes the handshake line to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Handshake`] when the write fails.
    pub fn announce<W: Write>(&self, writer: W) -> Result<(), ServeError> {
        handshake::announce(writer, &self.line)?;
        Ok(())
    }

    /// Accepts the host's connection and serves it until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Accept`] or [`ServeError::Connection`].
    pub fn serve_one(self) -> Result<(), ServeError> {
        let stream = self
            .listener
            .accept()
            .map_err(|source| ServeError::Accept { source })?;
        info!(target: SERVER_TARGET, "host connected");
        serve_connection(stream, &self.registry)
            .map_err(|source| ServeError::Connection { source })?;
        info!(target: SERVER_TARGET, "host disconnected");
        Ok(())
    }
}

/// Serves requests from `stream` until end of stream.
///
/// Every request is dispatched on its own scoped thread; the function
/// returns once the stream closes and every in-flight request has answered.
///
/// # Errors
///
/// Returns the read error that ended the loop.
pub fn serve_connection(stream: ConnectionStream, registry: &LocalRegistry) -> io::Result<()> {
    let writer = Mutex::new(stream.try_clone()?);
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    thread::scope(|scope| {
        loop {
            if protocol::read_line(&mut reader, &mut line)? == 0 {
                return Ok(());
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<CallRequest>(&line) {
                Ok(request) => {
                    let shared_writer = &writer;
                    scope.spawn(move || {
                        let response = registry.dispatch(request);
                        write_response(shared_writer, &response);
                    });
                }
                Err(error) => match reject(&line, &error) {
                    Some(response) => write_response(&writer, &response),
                    None => warn!(target: SERVER_TARGET, %error, "dropping undecodable request"),
                },
            }
        }
    })
}

/// Builds the error response for a request that failed to decode, when it
/// carries an id to answer.
fn reject(line: &[u8], error: &serde_json::Error) -> Option<CallResponse> {
    let value: Value = serde_json::from_slice(line).ok()?;
    let id = value.get("id")?.as_u64()?;
    let remote = match value.get("method").and_then(Value::as_str) {
        Some(method) if method.parse::<MethodName>().is_err() => RemoteError::unknown_method(method),
        _ => RemoteError::invalid_request(error.to_string()),
    };
    Some(CallResponse::error(id, remote))
}

fn write_response(writer: &Mutex<ConnectionStream>, response: &CallResponse) {
    let line = match protocol::to_line(response) {
        Ok(line) => line,
        Err(error) => {
            warn!(target: SERVER_TARGET, id = response.id, %error, "failed to encode response");
            return;
        }
    };
    let mut stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(error) = stream.write_all(&line).and_then(|()| stream.flush()) {
        debug!(target: SERVER_TARGET, id = response.id, %error, "host went away before response");
    }
}
