//! Host side of the RPC channel.
//!
//! [`RpcTransport`] multiplexes concurrent calls over one socket. Each call
//! takes a fresh id, registers a one-shot channel in the pending table and
//! writes its request line; a reader thread routes response lines back by
//! id. When the channel fails or is closed every pending caller is released
//! with the same [`TransportError`], and every later call fails with it
//! immediately.

mod error;
mod stream;


use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tether_config::SocketEndpoint;
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::protocol::{self, CallOutcome, CallRequest, CallResponse, MethodName, RemoteError};

pub use self::error::TransportError;
pub use self::stream::ConnectionStream;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Carries a call to the plugin and returns its response payload.
///
/// This is the seam between typed proxies and the wire.
pub trait Transport: Send + Sync {
    /// Invokes `method` with `payload` and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Transport`] when the channel fails,
    /// [`PluginError::UnknownMethod`] when the plugin does not serve the
    /// method, and [`PluginError::Remote`] for application errors.
    fn call(&self, method: &MethodName, payload: Value) -> Result<Value, PluginError>;
}

/// Tunables for [`RpcTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportOptions {
    call_timeout: Option<Duration>,
}

impl TransportOptions {
    /// Bounds every call by `timeout`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Per-call timeout, if any.
    #[must_use]
    pub const fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }
}

type Reply = Result<CallOutcome, TransportError>;

#[derive(Default)]
struct PendingCalls {
    waiters: HashMap<u64, SyncSender<Reply>>,
    closed: Option<TransportError>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<PendingCalls>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter unless the channel is already closed.
    fn register(&self, id: u64) -> Result<Receiver<Reply>, TransportError> {
        let mut pending = self.lock();
        if let Some(reason) = &pending.closed {
            return Err(reason.clone());
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        pending.waiters.insert(id, sender);
        Ok(receiver)
    }

    fn forget(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    fn deliver(&self, response: CallResponse) {
        let waiter = self.lock().waiters.remove(&response.id);
        match waiter {
            Some(sender) => {
                if sender.send(Ok(response.outcome)).is_err() {
                    debug!(target: TRANSPORT_TARGET, id = response.id, "caller gave up before response");
                }
            }
            None => warn!(
                target: TRANSPORT_TARGET,
                id = response.id,
                "dropping response for unknown call id"
            ),
        }
    }

    /// Marks the channel closed and releases every waiter. The first reason
    /// wins; later calls are no-ops.
    fn fail_all(&self, reason: TransportError) -> bool {
        let waiters = {
            let mut pending = self.lock();
            if pending.closed.is_some() {
                return false;
            }
            pending.closed = Some(reason.clone());
            std::mem::take(&mut pending.waiters)
        };
        debug!(
            target: TRANSPORT_TARGET,
            %reason,
            pending = waiters.len(),
            "transport closed"
        );
        for (_, sender) in waiters {
            // A caller that already timed out has dropped its receiver.
            sender.send(Err(reason.clone())).ok();
        }
        true
    }

    fn close_reason(&self) -> Option<TransportError> {
        self.lock().closed.clone()
    }
}

/// JSONL request/response client over a single socket connection.
pub struct RpcTransport {
    shared: Arc<Shared>,
    writer: Mutex<ConnectionStream>,
    control: ConnectionStream,
    next_id: AtomicU64,
    options: TransportOptions,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("closed", &self.shared.close_reason())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RpcTransport {
    /// Connects to the plugin's advertised endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the endpoint cannot be
    /// reached.
    pub fn connect(
        endpoint: &SocketEndpoint,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let stream =
            ConnectionStream::connect(endpoint).map_err(|source| TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: Arc::new(source),
            })?;
        debug!(target: TRANSPORT_TARGET, %endpoint, "connected to plugin");
        Self::from_stream(stream, options)
    }

    /// Wraps an already connected stream and starts the reader thread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the stream cannot be duplicated or
    /// the reader thread cannot be spawned.
    pub fn from_stream(
        stream: ConnectionStream,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let shared = Arc::new(Shared::default());
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(String::from("tether-rpc-reader"))
            .spawn(move || read_responses(reader, &reader_shared))?;
        Ok(Self {
            shared,
            writer: Mutex::new(stream),
            control,
            next_id: AtomicU64::new(1),
            options,
        })
    }

    /// Closes the channel, failing every in-flight and future call with
    /// `reason`. Only the first close takes effect.
    pub fn close(&self, reason: TransportError) {
        if self.shared.fail_all(reason) {
            if let Err(error) = self.control.shutdown() {
                debug!(target: TRANSPORT_TARGET, %error, "socket already shut down");
            }
        }
    }

    /// Returns `true` once the channel has failed or been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.close_reason().is_some()
    }

    /// Returns the failure that closed the channel, if any.
    #[must_use]
    pub fn close_reason(&self) -> Option<TransportError> {
        self.shared.close_reason()
    }

    fn send(&self, request: &CallRequest) -> Result<(), TransportError> {
        let line = protocol::to_line(request).map_err(|error| TransportError::Protocol {
            message: error.to_string(),
        })?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(&line)
            .and_then(|()| writer.flush())
            .map_err(TransportError::from)
    }

    fn wait(
        &self,
        receiver: &Receiver<Reply>,
        id: u64,
        method: &MethodName,
    ) -> Result<CallOutcome, TransportError> {
        let closed = || self.shared.close_reason().unwrap_or(TransportError::Closed);
        match self.options.call_timeout {
            None => receiver.recv().map_err(|_| closed())?,
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(reply) => reply,
                Err(RecvTimeoutError::Disconnected) => Err(closed()),
                Err(RecvTimeoutError::Timeout) => {
                    self.shared.forget(id);
                    Err(TransportError::Timeout {
                        method: method.to_string(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            },
        }
    }
}

impl Transport for RpcTransport {
    fn call(&self, method: &MethodName, payload: Value) -> Result<Value, PluginError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.shared.register(id)?;
        let request = CallRequest::new(id, method.clone(), payload);
        if let Err(error) = self.send(&request) {
            self.shared.forget(id);
            self.close(error.clone());
            return Err(error.into());
        }
        debug!(target: TRANSPORT_TARGET, id, %method, "call sent");
        match self.wait(&receiver, id, method)? {
            CallOutcome::Ok { payload } => Ok(payload),
            CallOutcome::Error(remote) => Err(remote_failure(method, remote)),
        }
    }
}

impl Drop for RpcTransport {
    fn drop(&mut self) {
        self.close(TransportError::Closed);
    }
}

fn remote_failure(method: &MethodName, remote: RemoteError) -> PluginError {
    match remote.kind {
        protocol::ErrorKind::UnknownMethod => PluginError::UnknownMethod {
            method: method.to_string(),
        },
        protocol::ErrorKind::UnknownCapability => PluginError::UnknownCapability {
            name: method.capability().to_owned(),
        },
        _ => PluginError::Remote(remote),
    }
}

fn read_responses(stream: ConnectionStream, shared: &Shared) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let reason = loop {
        match protocol::read_line(&mut reader, &mut line) {
            Ok(0) => break TransportError::ConnectionClosed,
            Ok(_) => {}
            Err(error) => break TransportError::from(error),
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<CallResponse>(&line) {
            Ok(response) => shared.deliver(response),
            Err(error) => {
                break TransportError::Protocol {
                    message: format!("undecodable response line: {error}"),
                };
            }
        }
    };
    shared.fail_all(reason);
}
