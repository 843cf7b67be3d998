//! Startup handshake between host and plugin.
//!
//! The host launches the plugin with the magic cookie and the list of
//! protocol versions it accepts in the environment. The plugin answers with a
//! single JSON line on stdout naming the protocol version it chose, echoing
//! the cookie, and advertising the endpoint the host must connect to:
//!
//! ```text
//! {"core_protocol_version":1,"protocol_version":1,"cookie":"calculator_example","endpoint":"unix:///tmp/.tmpX/plugin.sock","capabilities":[{"name":"calculator","contract":"calculator","version":"1.0"}]}
//! ```
//!
//! Nothing from the plugin is trusted until [`negotiate`] accepts that line.

mod plugin;

#[cfg(test)]
mod tests;

use std::io::{self, BufRead, BufReader, Read};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_config::SocketEndpoint;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capability::{ContractId, ContractVersion};
use crate::protocol;

pub use self::plugin::{
    announce, requested_network, select_protocol_version, verify_launch_environment,
};
pub(crate) use self::plugin::{negotiate_protocol_version, network_from_environment};

/// Version of the framework's own handshake and envelope format.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the comma-separated protocol versions the
/// host accepts.
pub const PROTOCOL_VERSIONS_ENV: &str = "TETHER_PLUGIN_PROTOCOL_VERSIONS";

/// Environment variable selecting the endpoint network (`unix` or `tcp`).
pub const TRANSPORT_ENV: &str = "TETHER_PLUGIN_TRANSPORT";

const HANDSHAKE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handshake");
const STDOUT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::plugin_stdout");

/// Handshake parameters known to both host and plugin at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    protocol_version: u32,
    min_protocol_version: u32,
    magic_cookie_key: &'static str,
    magic_cookie_value: &'static str,
}

impl HandshakeConfig {
    /// Creates a configuration accepting exactly `protocol_version`.
    #[must_use]
    pub const fn new(
        protocol_version: u32,
        magic_cookie_key: &'static str,
        magic_cookie_value: &'static str,
    ) -> Self {
        Self {
            protocol_version,
            min_protocol_version: protocol_version,
            magic_cookie_key,
            magic_cookie_value,
        }
    }

    /// Widens the accepted range down to `min_protocol_version`.
    #[must_use]
    pub const fn with_min_protocol_version(mut self, min_protocol_version: u32) -> Self {
        self.min_protocol_version = min_protocol_version;
        self
    }

    /// Replaces the cookie value.
    #[must_use]
    pub const fn with_magic_cookie_value(mut self, magic_cookie_value: &'static str) -> Self {
        self.magic_cookie_value = magic_cookie_value;
        self
    }

    /// Highest protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Lowest accepted protocol version.
    #[must_use]
    pub const fn min_protocol_version(&self) -> u32 {
        self.min_protocol_version
    }

    /// Environment variable name carrying the cookie.
    #[must_use]
    pub const fn magic_cookie_key(&self) -> &'static str {
        self.magic_cookie_key
    }

    /// Expected cookie value.
    #[must_use]
    pub const fn magic_cookie_value(&self) -> &'static str {
        self.magic_cookie_value
    }

    /// Accepted protocol versions.
    #[must_use]
    pub const fn accepted_versions(&self) -> RangeInclusive<u32> {
        self.min_protocol_version..=self.protocol_version
    }

    /// Returns `true` when `version` is in the accepted range.
    #[must_use]
    pub const fn accepts(&self, version: u32) -> bool {
        version >= self.min_protocol_version && version <= self.protocol_version
    }

    /// Environment the host passes to the plugin at launch.
    #[must_use]
    pub fn launch_environment(&self) -> Vec<(String, String)> {
        let versions = self
            .accepted_versions()
            .map(|version| version.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            (
                self.magic_cookie_key.to_owned(),
                self.magic_cookie_value.to_owned(),
            ),
            (PROTOCOL_VERSIONS_ENV.to_owned(), versions),
        ]
    }
}

/// A capability the plugin serves, as advertised in the handshake line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedCapability {
    /// Name the capability is served under.
    pub name: String,
    /// Contract it implements.
    pub contract: ContractId,
    /// Contract version it implements.
    pub version: ContractVersion,
}

/// The single line a plugin prints on stdout once it is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeLine {
    /// Framework protocol version.
    pub core_protocol_version: u32,
    /// Negotiated application protocol version.
    pub protocol_version: u32,
    /// Echo of the magic cookie value.
    pub cookie: String,
    /// Endpoint URL the host must connect to.
    pub endpoint: String,
    /// Capabilities the plugin serves.
    pub capabilities: Vec<AdvertisedCapability>,
}

impl HandshakeLine {
    /// Builds the line a plugin announces.
    #[must_use]
    pub fn new(
        protocol_version: u32,
        cookie: impl Into<String>,
        endpoint: &SocketEndpoint,
        capabilities: Vec<AdvertisedCapability>,
    ) -> Self {
        Self {
            core_protocol_version: CORE_PROTOCOL_VERSION,
            protocol_version,
            cookie: cookie.into(),
            endpoint: endpoint.to_string(),
            capabilities,
        }
    }

    /// Parses and validates a raw line against the host's expectations.
    ///
    /// # Errors
    ///
    /// Returns the first [`HandshakeError`] found, checking in order: JSON
    /// shape, core version, cookie, protocol version, endpoint.
    pub fn parse(line: &str, expected: &HandshakeConfig) -> Result<Negotiated, HandshakeError> {
        let parsed: Self =
            serde_json::from_str(line.trim()).map_err(|error| HandshakeError::Malformed {
                message: error.to_string(),
            })?;
        parsed.validate(expected)
    }

    /// Validates the line against the host's expectations.
    ///
    /// # Errors
    ///
    /// See [`HandshakeLine::parse`].
    pub fn validate(self, expected: &HandshakeConfig) -> Result<Negotiated, HandshakeError> {
        if self.core_protocol_version != CORE_PROTOCOL_VERSION {
            return Err(HandshakeError::CoreVersionMismatch {
                expected: CORE_PROTOCOL_VERSION,
                found: self.core_protocol_version,
            });
        }
        if self.cookie != expected.magic_cookie_value() {
            return Err(HandshakeError::CookieMismatch {
                key: expected.magic_cookie_key().to_owned(),
            });
        }
        if !expected.accepts(self.protocol_version) {
            return Err(HandshakeError::VersionMismatch {
                found: self.protocol_version,
                min: expected.min_protocol_version(),
                max: expected.protocol_version(),
            });
        }
        let endpoint = self.endpoint.parse::<SocketEndpoint>().map_err(|error| {
            HandshakeError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: error.to_string(),
            }
        })?;
        if !endpoint.is_local() {
            return Err(HandshakeError::InvalidEndpoint {
                endpoint: self.endpoint,
                reason: String::from("endpoint is not on the local machine"),
            });
        }
        Ok(Negotiated {
            protocol_version: self.protocol_version,
            endpoint,
            capabilities: self.capabilities,
        })
    }
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Protocol version both sides speak.
    pub protocol_version: u32,
    /// Endpoint of the plugin's RPC server.
    pub endpoint: SocketEndpoint,
    /// Capabilities the plugin serves.
    pub capabilities: Vec<AdvertisedCapability>,
}

impl Negotiated {
    /// Looks up an advertised capability by name.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&AdvertisedCapability> {
        self.capabilities
            .iter()
            .find(|capability| capability.name == name)
    }
}

/// Handshake failures. Every one of them is fatal to plugin startup.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No handshake line arrived in time.
    #[error("plugin did not complete the handshake within {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// Stdout closed before a handshake line arrived.
    #[error("plugin exited or closed stdout before completing the handshake")]
    StreamClosed,
    /// The handshake line was not valid JSON of the expected shape.
    #[error("malformed handshake line: {message}")]
    Malformed {
        /// Parser diagnostic.
        message: String,
    },
    /// The plugin was built against another framework protocol.
    #[error("plugin speaks core protocol {found}, host requires {expected}")]
    CoreVersionMismatch {
        /// Version the host speaks.
        expected: u32,
        /// Version the plugin announced.
        found: u32,
    },
    /// The echoed cookie differs from the expected value.
    #[error("plugin handshake cookie '{key}' does not match")]
    CookieMismatch {
        /// Name of the cookie variable.
        key: String,
    },
    /// The negotiated protocol version is outside the accepted range.
    #[error("plugin chose protocol version {found}, host accepts {min}..={max}")]
    VersionMismatch {
        /// Version the plugin announced.
        found: u32,
        /// Lowest version the host accepts.
        min: u32,
        /// Highest version the host accepts.
        max: u32,
    },
    /// The advertised endpoint cannot be used.
    #[error("plugin advertised unusable endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint text as announced.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The plugin binary was started without the host's cookie.
    #[error(
        "this binary is a plugin and must be launched by its host; \
         the {key} environment variable is missing or wrong"
    )]
    NotLaunchedByHost {
        /// Name of the cookie variable.
        key: String,
    },
    /// None of the host's offered versions is supported by the plugin.
    #[error("host offered protocol versions '{offered}', none are supported")]
    NoCommonVersion {
        /// Raw list offered by the host.
        offered: String,
    },
    /// The requested transport network is not recognised.
    #[error("unsupported plugin transport '{value}'")]
    UnsupportedTransport {
        /// Raw value of the transport variable.
        value: String,
    },
    /// Reading or writing the handshake failed.
    #[error("handshake I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

type FirstLine = io::Result<Option<String>>;

/// Waits for the plugin's handshake line and validates it.
///
/// Stdout is read on a dedicated thread. Once the handshake line has been
/// delivered (or the wait given up) that thread keeps draining stdout into
/// `tracing` debug events until the plugin closes it. This function never
/// terminates the plugin; the caller owns that decision.
///
/// # Errors
///
/// Returns [`HandshakeError`] when no valid line arrives within `timeout`.
pub fn negotiate<R>(
    stdout: R,
    expected: &HandshakeConfig,
    timeout: Duration,
) -> Result<Negotiated, HandshakeError>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel::<FirstLine>(1);
    thread::Builder::new()
        .name(String::from("tether-plugin-stdout"))
        .spawn(move || pump_stdout(stdout, &sender))
        .map_err(|error| HandshakeError::Io(Arc::new(error)))?;

    let line = match receiver.recv_timeout(timeout) {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) | Err(RecvTimeoutError::Disconnected) => {
            return Err(HandshakeError::StreamClosed);
        }
        Ok(Err(error)) => return Err(HandshakeError::Io(Arc::new(error))),
        Err(RecvTimeoutError::Timeout) => {
            return Err(HandshakeError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
    };

    let negotiated = HandshakeLine::parse(&line, expected)?;
    debug!(
        target: HANDSHAKE_TARGET,
        protocol_version = negotiated.protocol_version,
        endpoint = %negotiated.endpoint,
        capabilities = negotiated.capabilities.len(),
        "plugin handshake accepted"
    );
    Ok(negotiated)
}

fn pump_stdout<R: Read>(stdout: R, sender: &SyncSender<FirstLine>) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    let first = match protocol::read_line(&mut reader, &mut buffer) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(String::from_utf8_lossy(&buffer).into_owned())),
        Err(error) => Err(error),
    };
    let keep_draining = matches!(first, Ok(Some(_)));
    if sender.send(first).is_err() {
        debug!(
            target: HANDSHAKE_TARGET,
            "handshake wait ended before the first stdout line arrived"
        );
    }
    if keep_draining {
        drain_lines(reader);
    }
}

fn drain_lines<R: BufRead>(reader: R) {
    for line in reader.lines() {
        match line {
            Ok(text) => debug!(target: STDOUT_TARGET, line = %text, "plugin stdout"),
            Err(error) => {
                warn!(target: STDOUT_TARGET, %error, "stopped reading plugin stdout");
                break;
            }
        }
    }
}
