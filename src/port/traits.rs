//! Core traits for the transport boundary.
//!
//! A `Transport` is one open, line-oriented byte channel to a device. A
//! `TransportOpener` knows how to open transports by port name and how to
//! enumerate the ports the platform currently offers. Sessions only ever talk
//! to these traits, so the serial implementation and the in-memory mock are
//! interchangeable.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters used to open a transport and pace the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Per-read timeout for ordinary calls.
    pub read_timeout: Duration,

    /// Per-read timeout used while negotiating the method table.
    pub handshake_timeout: Duration,

    /// Minimum spacing between two consecutive writes.
    pub write_delay: Duration,

    /// Settle time between opening the port and the first byte sent.
    ///
    /// Many boards reset when DTR toggles on open; anything written before the
    /// bootloader hands over to the firmware is lost.
    pub reset_delay: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(2),
            write_delay: Duration::from_millis(50),
            reset_delay: Duration::from_secs(2),
        }
    }
}

impl ConnectionParams {
    /// Parameters with every delay set to zero, for in-memory transports.
    pub fn immediate() -> Self {
        Self {
            write_delay: Duration::ZERO,
            reset_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Override the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override the reset settle delay.
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }
}

/// A line-oriented, half-duplex byte channel to one device.
pub trait Transport: Send + std::fmt::Debug {
    /// Name/path of the underlying port.
    fn name(&self) -> &str;

    /// Write bytes, honouring the transport's write pacing.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read one newline-terminated line, without its terminator.
    ///
    /// Returns `Ok(None)` if no complete line arrived before `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, PortError>;

    /// Drop any buffered, not yet consumed input.
    fn clear_input(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Release the underlying port. Further I/O fails with `PortError::Closed`.
    fn close(&mut self) -> Result<(), PortError>;
}

/// Opens transports by port name and enumerates candidate ports.
pub trait TransportOpener {
    /// Open the named port.
    fn open(&self, port: &str, params: &ConnectionParams) -> Result<Box<dyn Transport>, PortError>;

    /// List the platform identifiers of every port currently available.
    fn list_available_ports(&self) -> Result<Vec<String>, PortError>;
}

/// Strip a trailing `\n` and an optional `\r` before it.
pub(crate) fn trim_line_ending(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}
