use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Endpoint descriptor advertised by a plugin during the handshake.
///
/// The textual form is a URL: `unix:///run/plugin.sock` or
/// `tcp://127.0.0.1:40123`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Unix domain socket endpoint.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP socket endpoint.
    Tcp {
        /// Host name or address literal.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the Unix socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Returns the transport network name (`unix` or `tcp`).
    #[must_use]
    pub const fn network(&self) -> Network {
        match self {
            Self::Unix { .. } => Network::Unix,
            Self::Tcp { .. } => Network::Tcp,
        }
    }

    /// Returns `true` when the endpoint can only be reached from this machine.
    ///
    /// Unix sockets are always local; TCP endpoints must name a loopback
    /// address or `localhost`.
    #[must_use]
    pub fn is_local(&self) -> bool {
        match self {
            Self::Unix { .. } => true,
            Self::Tcp { host, .. } => {
                let trimmed = host.trim_start_matches('[').trim_end_matches(']');
                trimmed.eq_ignore_ascii_case("localhost")
                    || trimmed
                        .parse::<IpAddr>()
                        .is_ok_and(|address| address.is_loopback())
            }
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Network family of a [`SocketEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Network {
    /// Unix domain sockets.
    Unix,
    /// TCP over the loopback interface.
    Tcp,
}

impl Network {
    /// Returns the preferred network for the current platform.
    #[must_use]
    pub const fn platform_default() -> Self {
        if cfg!(unix) { Self::Unix } else { Self::Tcp }
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was not recognised.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn display_unix_socket() {
        let endpoint = SocketEndpoint::unix(Utf8PathBuf::from("/tmp/tether/plugin.sock"));
        assert_eq!(endpoint.to_string(), "unix:///tmp/tether/plugin.sock");
    }

    #[test]
    fn display_round_trips_through_parse() {
        let endpoint = SocketEndpoint::unix("/tmp/tether/plugin.sock");
        let parsed: SocketEndpoint = endpoint.to_string().parse().expect("parse unix endpoint");
        assert_eq!(parsed, endpoint);
    }

    #[test]
    fn parse_tcp_socket() {
        let endpoint: SocketEndpoint = "tcp://127.0.0.1:9000".parse().expect("parse tcp");
        assert!(matches!(endpoint, SocketEndpoint::Tcp { port: 9000, .. }));
        assert_eq!(endpoint.network(), Network::Tcp);
    }

    #[rstest]
    #[case::missing_port("tcp://127.0.0.1")]
    #[case::unknown_scheme("http://127.0.0.1:80")]
    #[case::not_a_url("plugin.sock")]
    fn parse_rejects_invalid_descriptors(#[case] input: &str) {
        assert!(input.parse::<SocketEndpoint>().is_err(), "{input} should fail");
    }

    #[rstest]
    #[case(SocketEndpoint::unix("/tmp/p.sock"), true)]
    #[case(SocketEndpoint::tcp("127.0.0.1", 1), true)]
    #[case(SocketEndpoint::tcp("[::1]", 1), true)]
    #[case(SocketEndpoint::tcp("localhost", 1), true)]
    #[case(SocketEndpoint::tcp("10.0.0.8", 1), false)]
    #[case(SocketEndpoint::tcp("example.com", 1), false)]
    fn locality_matches_loopback_rules(#[case] endpoint: SocketEndpoint, #[case] expected: bool) {
        assert_eq!(endpoint.is_local(), expected, "{endpoint}");
    }

    #[test]
    fn network_parses_case_insensitively() {
        assert_eq!("TCP".parse::<Network>().expect("parse"), Network::Tcp);
        assert_eq!(Network::Unix.to_string(), "unix");
    }
}
