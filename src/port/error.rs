//! Transport-level error types.
//!
//! Kept separate from protocol and discovery errors so that a failed open can
//! be told apart from a device that answered with garbage.

use thiserror::Error;

/// Errors that can occur while opening or talking to a transport.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The port exists but could not be opened (busy, permissions, ...).
    #[error("Serial port '{port}' could not be opened: {message}")]
    Unavailable { port: String, message: String },

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport was already closed.
    #[error("Port is closed")]
    Closed,

    /// Enumerating the system's ports failed.
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create an Unavailable error for a port that exists but refused to open.
    pub fn unavailable(port_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            port: port_name.into(),
            message: message.into(),
        }
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
