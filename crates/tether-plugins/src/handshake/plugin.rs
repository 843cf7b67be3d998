//! Plugin side of the handshake.

use std::env;
use std::ffi::OsStr;
use std::io::Write;
use std::sync::Arc;

use tether_config::Network;

use super::{HandshakeConfig, HandshakeError, HandshakeLine, PROTOCOL_VERSIONS_ENV, TRANSPORT_ENV};

/// Refuses to run unless the host's cookie is present in the environment.
///
/// A plugin started by hand has no cookie; the returned error explains that
/// the binary must be launched by its host.
///
/// # Errors
///
/// Returns [`HandshakeError::NotLaunchedByHost`] when the cookie is missing
/// or differs from the expected value.
pub fn verify_launch_environment(config: &HandshakeConfig) -> Result<(), HandshakeError> {
    verify_cookie(config, env::var_os(config.magic_cookie_key()).as_deref())
}

pub(super) fn verify_cookie(
    config: &HandshakeConfig,
    value: Option<&OsStr>,
) -> Result<(), HandshakeError> {
    if value == Some(OsStr::new(config.magic_cookie_value())) {
        Ok(())
    } else {
        Err(HandshakeError::NotLaunchedByHost {
            key: config.magic_cookie_key().to_owned(),
        })
    }
}

/// Picks the highest protocol version offered by the host that this plugin
/// supports.
///
/// `offered` is the raw value of the versions variable; when the host did
/// not set it the plugin's own protocol version is used. Entries that are
/// not integers are ignored.
///
/// # Errors
///
/// Returns [`HandshakeError::NoCommonVersion`] when no offered version falls
/// in the plugin's accepted range.
pub fn select_protocol_version(
    config: &HandshakeConfig,
    offered: Option<&str>,
) -> Result<u32, HandshakeError> {
    let Some(raw) = offered else {
        return Ok(config.protocol_version());
    };
    raw.split(',')
        .filter_map(|entry| entry.trim().parse::<u32>().ok())
        .filter(|version| config.accepts(*version))
        .max()
        .ok_or_else(|| HandshakeError::NoCommonVersion {
            offered: raw.to_owned(),
        })
}

/// Reads the host's offered versions from the environment and selects one.
///
/// # Errors
///
/// See [`select_protocol_version`].
pub(crate) fn negotiate_protocol_version(config: &HandshakeConfig) -> Result<u32, HandshakeError> {
    let offered = env::var(PROTOCOL_VERSIONS_ENV).ok();
    select_protocol_version(config, offered.as_deref())
}

/// Resolves the endpoint network requested by the host.
///
/// Unix sockets are used by default where the platform has them. A request
/// for Unix sockets on a platform without them falls back to TCP.
///
/// # Errors
///
/// Returns [`HandshakeError::UnsupportedTransport`] for unrecognised values.
pub fn requested_network(value: Option<&str>) -> Result<Network, HandshakeError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Network::platform_default());
    };
    let network = raw
        .parse::<Network>()
        .map_err(|_| HandshakeError::UnsupportedTransport {
            value: raw.to_owned(),
        })?;
    if cfg!(unix) {
        Ok(network)
    } else {
        Ok(Network::Tcp)
    }
}

/// Reads the requested network from the environment.
///
/// # Errors
///
/// See [`requested_network`].
pub(crate) fn network_from_environment() -> Result<Network, HandshakeError> {
    requested_network(env::var(TRANSPORT_ENV).ok().as_deref())
}

/// Writes the handshake line and flushes it.
///
/// # Errors
///
/// Returns [`HandshakeError::Io`] when writing fails.
pub fn announce<W: Write>(mut writer: W, line: &HandshakeLine) -> Result<(), HandshakeError> {
    let mut encoded = serde_json::to_vec(line).map_err(|error| HandshakeError::Malformed {
        message: error.to_string(),
    })?;
    encoded.push(b'\n');
    writer
        .write_all(&encoded)
        .and_then(|()| writer.flush())
        .map_err(|error| HandshakeError::Io(Arc::new(error)))
}
