//! Listening socket for the plugin's single host connection.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

#[cfg(unix)]
use std::os::unix::net::UnixListener;

#[cfg(unix)]
use camino::Utf8PathBuf;
use tempfile::TempDir;
use tether_config::{Network, SocketEndpoint};

use super::ServeError;
use crate::transport::ConnectionStream;

#[cfg(unix)]
const SOCKET_FILE: &str = "plugin.sock";
#[cfg(unix)]
const SOCKET_DIR_PREFIX: &str = "tether-plugin-";

/// Bound listener plus the endpoint to announce.
///
/// Unix sockets live in a private temporary directory that is removed when
/// the listener is dropped.
#[derive(Debug)]
pub(super) struct PluginListener {
    endpoint: SocketEndpoint,
    kind: ListenerKind,
    _socket_dir: Option<TempDir>,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl PluginListener {
    pub(super) fn bind(network: Network) -> Result<Self, ServeError> {
        match network {
            #[cfg(unix)]
            Network::Unix => bind_unix(),
            #[cfg(not(unix))]
            Network::Unix => bind_tcp(),
            Network::Tcp => bind_tcp(),
        }
    }

    pub(super) const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Blocks until the host connects.
    pub(super) fn accept(&self) -> io::Result<ConnectionStream> {
        match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::from(stream))
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Ok(ConnectionStream::from(stream))
            }
        }
    }
}

fn bind_tcp() -> Result<PluginListener, ServeError> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|source| ServeError::Bind {
            endpoint: format!("tcp://{}:0", Ipv4Addr::LOCALHOST),
            source,
        })?;
    let port = listener
        .local_addr()
        .map_err(|source| ServeError::Bind {
            endpoint: format!("tcp://{}:0", Ipv4Addr::LOCALHOST),
            source,
        })?
        .port();
    Ok(PluginListener {
        endpoint: SocketEndpoint::tcp(Ipv4Addr::LOCALHOST.to_string(), port),
        kind: ListenerKind::Tcp(listener),
        _socket_dir: None,
    })
}

#[cfg(unix)]
fn bind_unix() -> Result<PluginListener, ServeError> {
    let socket_dir = tempfile::Builder::new()
        .prefix(SOCKET_DIR_PREFIX)
        .tempdir()
        .map_err(|source| ServeError::SocketDir { source })?;
    let path = Utf8PathBuf::from_path_buf(socket_dir.path().join(SOCKET_FILE)).map_err(|path| {
        ServeError::NonUtf8SocketPath {
            path: path.display().to_string(),
        }
    })?;
    let listener = UnixListener::bind(path.as_std_path()).map_err(|source| ServeError::Bind {
        endpoint: path.to_string(),
        source,
    })?;
    Ok(PluginListener {
        endpoint: SocketEndpoint::unix(path),
        kind: ListenerKind::Unix(listener),
        _socket_dir: Some(socket_dir),
    })
}
