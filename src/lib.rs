//! Remote Device Library
//!
//! Host-side client for microcontroller firmware that exposes a method
//! table over a serial line. A session negotiates the table at runtime, so
//! the host calls device methods by name without knowing them in advance.
//!
//! # Modules
//!
//! - `port`: Transport abstraction (serial ports and in-memory mocks)
//! - `codec`: Request/response envelope for both protocol generations
//! - `method_table`: Negotiated method ids, names and parameter orders
//! - `naming`: Wire name ↔ call name conversion
//! - `identity`: Device identity and its fields
//! - `session`: Handshake state machine and method invocation
//! - `discovery`: Port scanning, probing and identity filtering
//! - `registry`: Sessions from a discovery pass, looked up by identity
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing subscriber setup
//! - `error`: Unified error handling
//!
//! # Example
//!
//! ```no_run
//! use remote_device::{Discovery, IdentityFilter, SessionOptions, SystemPorts};
//!
//! let ports = SystemPorts;
//! let discovery = Discovery::new(&ports, SessionOptions::default());
//! let mut device = discovery
//!     .find_one(None, &IdentityFilter::any().name("stepper_controller"))
//!     .unwrap();
//! println!("{:?}", device.methods());
//! device.invoke("set_position", vec![serde_json::json!(1200)]).unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod logging;
pub mod method_table;
pub mod naming;
pub mod port;
pub mod registry;
pub mod session;

// Re-export commonly used types for convenience
pub use codec::{Codec, Generation, RequestId};
pub use discovery::{
    DeviceMatch, Discovery, DiscoveryReport, IdentityFilter, PortScanner, ProbeOutcome, Rejection,
};
pub use error::{DeviceError, DeviceReport, DeviceResult, ProtocolError};
pub use identity::{Identity, IdentityField, IdentityValue};
pub use method_table::{MethodId, MethodInfo, MethodRef, MethodTable};
pub use naming::{Naming, SnakeCaseNaming, VerbatimNaming};
pub use port::{
    ConnectionParams, MockDevice, MockPorts, MockTransport, PortError, SerialTransport,
    SystemPorts, Transport, TransportOpener,
};
pub use registry::{DeviceRegistry, Lookup};
pub use session::{Args, Session, SessionOptions, SessionState};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
