//! Call envelopes exchanged between host and plugin.
//!
//! Every message on the RPC channel is a single line of JSON (JSONL). The
//! host writes [`CallRequest`] lines and the plugin answers with
//! [`CallResponse`] lines carrying the same `id`. Responses may arrive in any
//! order; the id is the only correlation key.
//!
//! ```text
//! {"id":7,"method":"calculator.Add","payload":{"a":10.0,"b":5.0}}
//! {"id":7,"outcome":{"ok":{"payload":{"result":15.0}}}}
//! {"id":8,"outcome":{"error":{"kind":"computation","code":"division_by_zero","message":"division by zero"}}}
//! ```

use std::fmt;
use std::io::{self, BufRead, Read};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::PluginError;

/// Largest JSONL line accepted on either side of the channel, newline
/// included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const LINE_READ_LIMIT: u64 = 1024 * 1024;

/// Validated `Capability.Operation` method identifier.
///
/// # Example
///
/// ```
/// use tether_plugins::protocol::MethodName;
///
/// let method: MethodName = "calculator.Add".parse().expect("valid method");
/// assert_eq!(method.capability(), "calculator");
/// assert_eq!(method.operation(), "Add");
/// assert!("calculator".parse::<MethodName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodName {
    capability: String,
    operation: String,
}

impl MethodName {
    /// Builds a method identifier from its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`MethodNameError`] when either half is empty or contains a
    /// dot or whitespace.
    pub fn new(
        capability: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<Self, MethodNameError> {
        let capability = capability.into();
        let operation = operation.into();
        validate_segment(&capability, "capability")?;
        validate_segment(&operation, "operation")?;
        Ok(Self {
            capability,
            operation,
        })
    }

    /// Capability half of the identifier.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Operation half of the identifier.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// Checks a capability name or operation name for use in a method id.
pub(crate) fn validate_segment(segment: &str, role: &'static str) -> Result<(), MethodNameError> {
    if segment.is_empty() {
        return Err(MethodNameError::EmptySegment { role });
    }
    if segment.contains('.') || segment.chars().any(char::is_whitespace) {
        return Err(MethodNameError::InvalidSegment {
            role,
            segment: segment.to_owned(),
        });
    }
    Ok(())
}

impl fmt::Display for MethodName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.capability, self.operation)
    }
}

impl FromStr for MethodName {
    type Err = MethodNameError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (capability, operation) = input
            .split_once('.')
            .ok_or_else(|| MethodNameError::MissingSeparator(input.to_owned()))?;
        Self::new(capability, operation)
    }
}

impl TryFrom<String> for MethodName {
    type Error = MethodNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodName> for String {
    fn from(value: MethodName) -> Self {
        value.to_string()
    }
}

/// Reasons a method identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodNameError {
    /// The identifier has no `.` separator.
    #[error("method '{0}' must have the form Capability.Operation")]
    MissingSeparator(String),
    /// One half of the identifier is empty.
    #[error("method {role} must not be empty")]
    EmptySegment {
        /// Which half was empty.
        role: &'static str,
    },
    /// One half contains a dot or whitespace.
    #[error("method {role} '{segment}' must not contain dots or whitespace")]
    InvalidSegment {
        /// Which half was invalid.
        role: &'static str,
        /// Offending text.
        segment: String,
    },
}

/// Request envelope written by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Correlation id, unique per transport.
    pub id: u64,
    /// Method being invoked.
    pub method: MethodName,
    /// Operation-specific request record.
    #[serde(default)]
    pub payload: Value,
}

impl CallRequest {
    /// Builds a request envelope.
    #[must_use]
    pub const fn new(id: u64, method: MethodName, payload: Value) -> Self {
        Self {
            id,
            method,
            payload,
        }
    }
}

/// Response envelope written by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    /// Id of the request being answered.
    pub id: u64,
    /// Result of the call.
    pub outcome: CallOutcome,
}

impl CallResponse {
    /// Builds a successful response.
    #[must_use]
    pub const fn ok(id: u64, payload: Value) -> Self {
        Self {
            id,
            outcome: CallOutcome::Ok { payload },
        }
    }

    /// Builds an error response.
    #[must_use]
    pub const fn error(id: u64, error: RemoteError) -> Self {
        Self {
            id,
            outcome: CallOutcome::Error(error),
        }
    }
}

/// Exactly one of a response payload or an application error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call succeeded.
    Ok {
        /// Operation-specific response record.
        payload: Value,
    },
    /// The call failed inside the plugin.
    Error(RemoteError),
}

impl CallOutcome {
    /// Converts the outcome into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the [`RemoteError`] carried by an error outcome.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Ok { payload } => Ok(payload),
            Self::Error(error) => Err(error),
        }
    }
}

/// Application error reported by the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} error '{code}': {message}")]
pub struct RemoteError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Stable machine-readable code within the class.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl RemoteError {
    /// Builds a remote error.
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error answered for a method the plugin does not serve.
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            ErrorKind::UnknownMethod,
            "unknown_method",
            format!("unknown method '{method}'"),
        )
    }

    /// Error answered for a payload that does not decode.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, "invalid_request", message)
    }

    /// Error answered when the plugin fails outside the capability logic.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "internal", message)
    }
}

/// Wire taxonomy of call failures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// No capability of the requested name is served.
    UnknownCapability,
    /// The capability does not implement the requested operation.
    UnknownMethod,
    /// The capability refused the call because of its lifecycle state.
    Capability,
    /// The operation itself failed.
    Computation,
    /// The request payload could not be decoded.
    InvalidRequest,
    /// The plugin failed for reasons unrelated to the request.
    Internal,
}

/// Request or response record with no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Encodes a record as a JSON value.
///
/// # Errors
///
/// Returns [`PluginError::Serialize`] when the record cannot be represented.
pub fn encode<T: Serialize>(what: &'static str, record: &T) -> Result<Value, PluginError> {
    serde_json::to_value(record).map_err(|source| PluginError::Serialize {
        what,
        source: Arc::new(source),
    })
}

/// Decodes a record from a JSON value. `null` decodes as an empty object.
///
/// # Errors
///
/// Returns [`PluginError::Deserialize`] when the value does not match.
pub fn decode<T: DeserializeOwned>(what: &'static str, value: Value) -> Result<T, PluginError> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|source| PluginError::Deserialize {
        what,
        source: Arc::new(source),
    })
}

/// Serialises an envelope into a newline-terminated line.
pub(crate) fn to_line<T: Serialize>(envelope: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

/// Reads one newline-terminated line into `buffer`, bounded by
/// [`MAX_LINE_BYTES`].
///
/// Returns `Ok(0)` at end of stream. A final line without a trailing newline
/// is returned as-is.
///
/// # Errors
///
/// Returns [`io::ErrorKind::InvalidData`] when the line exceeds the limit, or
/// the underlying read error.
pub fn read_line<R: BufRead>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<usize> {
    buffer.clear();
    let read = reader
        .by_ref()
        .take(LINE_READ_LIMIT)
        .read_until(b'\n', buffer)?;
    if read >= MAX_LINE_BYTES && buffer.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message exceeds {MAX_LINE_BYTES} bytes"),
        ));
    }
    Ok(read)
}

#[cfg(test)]
mod tests;
