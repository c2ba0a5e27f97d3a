//! Transport layer.
//!
//! Defines the `Transport`/`TransportOpener` boundary the session talks to,
//! the `serialport`-backed implementation and in-memory mocks for tests.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockDevice, MockPorts, MockTransport};
pub use sync_port::{SerialTransport, SystemPorts};
pub use traits::*;
