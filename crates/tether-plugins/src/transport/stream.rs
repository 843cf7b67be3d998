//! Socket streams carrying the RPC channel.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use tether_config::SocketEndpoint;

/// A connected Unix domain or TCP socket.
#[derive(Debug)]
pub enum ConnectionStream {
    /// TCP connection over loopback.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Dials the endpoint.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or [`io::ErrorKind::Unsupported`] for Unix
    /// endpoints on platforms without Unix sockets.
    pub fn connect(endpoint: &SocketEndpoint) -> io::Result<Self> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.trim_matches(['[', ']']), *port))?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    UnixStream::connect(path.as_std_path()).map(Self::Unix)
                }

                #[cfg(not(unix))]
                {
                    Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("unix socket {path} is not supported on this platform"),
                    ))
                }
            }
        }
    }

    /// Creates an independently owned handle to the same socket.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the operating system.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Shuts down both directions, waking any blocked reader.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the operating system.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl From<TcpStream> for ConnectionStream {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for ConnectionStream {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}
