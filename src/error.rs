//! Unified error handling.
//!
//! `PortError` covers the transport, `ProtocolError` the wire envelope and
//! `ConfigError` configuration loading. `DeviceError` is what every public
//! session, discovery and registry operation returns.

use crate::codec::RequestId;
use crate::config::ConfigError;
use crate::discovery::DeviceMatch;
use crate::port::PortError;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Convenient result alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Violations of the request/response envelope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// No line arrived within the read timeout.
    #[error("Did not receive a device response")]
    EmptyResponse,

    /// The line is not the expected JSON record.
    #[error("Unable to parse device response '{line}': {reason}")]
    MalformedResponse { line: String, reason: String },

    /// A required correlation field is absent.
    #[error("Device response does not contain '{0}'")]
    MissingField(&'static str),

    /// The echoed id differs from the id that was sent.
    #[error("Response id {received} does not match request id {expected}")]
    IdMismatch { expected: RequestId, received: Value },

    /// The method listing could not be turned into a method table.
    #[error("Invalid method listing: {0}")]
    InvalidMethodTable(String),

    /// The identity query returned something unusable.
    #[error("Invalid device identity: {0}")]
    InvalidIdentity(String),

    /// The response-codes query is missing a required code.
    #[error("Response codes do not contain '{0}'")]
    MissingResponseCode(&'static str),
}

impl ProtocolError {
    pub fn malformed(line: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::MalformedResponse {
            line: line.into(),
            reason: reason.to_string(),
        }
    }
}

/// Diagnostic payload of a device-reported error, carried verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceReport {
    pub message: Option<String>,
    pub data: Option<Value>,
    pub code: Option<Value>,
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.as_deref().unwrap_or("");
        let data = self.data.as_ref().map(Value::to_string).unwrap_or_default();
        let code = self.code.as_ref().map(Value::to_string).unwrap_or_default();
        write!(f, "message: {message}, data: {data}, code: {code}")
    }
}

/// Every error a session, discovery pass or registry can return.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The port is busy, absent or refused to open.
    #[error("Could not open '{port}': {source}")]
    TransportOpen {
        port: String,
        #[source]
        source: PortError,
    },

    /// The device did not complete the handshake (no or garbled response).
    #[error("Handshake with '{port}' failed: {source}")]
    Handshake {
        port: String,
        #[source]
        source: Box<DeviceError>,
    },

    /// Malformed response, missing field, id mismatch or empty response.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device answered with its error status.
    #[error("(from device) {0}")]
    DeviceReported(DeviceReport),

    /// The session was closed before the call.
    #[error("Session on '{0}' is closed")]
    ClosedSession(String),

    /// No method with that call name, wire name or id.
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    /// Named arguments did not fit the method's parameter order.
    #[error("Invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },

    /// No device matched the filter.
    #[error("Could not find any matching devices. Check connections and permissions. Tried ports: {tried:?}")]
    DiscoveryNotFound { tried: Vec<String> },

    /// More than one device matched the filter.
    #[error("Found more than one matching device. Specify a port or narrow the filter. Matching: {}", format_matches(.matches))]
    DiscoveryAmbiguous { matches: Vec<DeviceMatch> },

    /// A registry already holds a session on this port.
    #[error("A session on '{0}' is already registered")]
    DuplicatePort(String),

    /// Transport failure on an open session.
    #[error("Transport error: {0}")]
    Transport(#[from] PortError),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DeviceError {
    pub fn invalid_arguments(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.into(),
            message: message.into(),
        }
    }
}

fn format_matches(matches: &[DeviceMatch]) -> String {
    matches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
