//! Serial transport implementation.
//!
//! Wraps the `serialport` crate's `SerialPort` trait with our `Transport`
//! trait: newline framing, write pacing and explicit close.

use super::error::PortError;
use super::traits::{trim_line_ending, ConnectionParams, Transport, TransportOpener};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const READ_CHUNK: usize = 256;

/// Serial transport wrapping `serialport::SerialPort`.
pub struct SerialTransport {
    /// The underlying serial port, `None` once closed.
    port: Option<Box<dyn serialport::SerialPort>>,
    /// The port name/path for identification.
    name: String,
    /// Bytes received but not yet returned as a line.
    pending: Vec<u8>,
    /// Minimum spacing between writes.
    write_delay: Duration,
    last_write: Option<Instant>,
}

impl SerialTransport {
    /// Open a serial port with the given parameters (8N1, no flow control).
    ///
    /// # Example
    /// ```no_run
    /// use remote_device::port::{ConnectionParams, SerialTransport};
    ///
    /// let port = SerialTransport::open("/dev/ttyACM0", &ConnectionParams::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, params: &ConnectionParams) -> Result<Self, PortError> {
        let port = serialport::new(port_name, params.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(params.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(port_name),
                serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
                serialport::ErrorKind::Io(_) => PortError::unavailable(port_name, e.to_string()),
                _ => PortError::Serial(e),
            })?;

        debug!(port = port_name, baud = params.baud_rate, "serial port opened");

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
            pending: Vec::new(),
            write_delay: params.write_delay,
            last_write: None,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, PortError> {
        self.port.as_mut().ok_or(PortError::Closed)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = memchr::memchr(b'\n', &self.pending)?;
        let rest = self.pending.split_off(end + 1);
        let line = std::mem::replace(&mut self.pending, rest);
        Some(trim_line_ending(line))
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < self.write_delay {
                std::thread::sleep(self.write_delay - elapsed);
            }
        }
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        self.last_write = Some(Instant::now());
        Ok(data.len())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, PortError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                trace!(port = %self.name, buffered = self.pending.len(), "read_line timed out");
                return Ok(None);
            }

            let port = self.port_mut()?;
            port.set_timeout(remaining)?;
            match port.read(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    continue
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PortError::Io(e)),
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        self.pending.clear();
        self.port_mut()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(PortError::Serial)
    }

    fn close(&mut self) -> Result<(), PortError> {
        if self.port.take().is_some() {
            debug!(port = %self.name, "serial port closed");
        }
        self.pending.clear();
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("baud_rate", &self.port.as_ref().and_then(|p| p.baud_rate().ok()))
            .finish()
    }
}

/// Opens real serial ports and enumerates them through `serialport`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl TransportOpener for SystemPorts {
    fn open(&self, port: &str, params: &ConnectionParams) -> Result<Box<dyn Transport>, PortError> {
        Ok(Box::new(SerialTransport::open(port, params)?))
    }

    fn list_available_ports(&self) -> Result<Vec<String>, PortError> {
        let ports = serialport::available_ports()
            .map_err(|e| PortError::Enumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }
}
