//! Configuration module.
//!
//! TOML configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `REMOTE_DEVICE_CONFIG` environment variable (explicit path)
//! 2. `./remote_device.toml` (current directory)
//! 3. `~/.config/remote-device/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\remote-device\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `REMOTE_DEVICE_<SECTION>_<KEY>`:
//! - `REMOTE_DEVICE_CONNECTION_BAUD_RATE=9600`
//! - `REMOTE_DEVICE_PROTOCOL_GENERATION=json_rpc`
//! - `REMOTE_DEVICE_DISCOVERY_PORTS=/dev/ttyACM0,/dev/ttyACM1`
//!
//! # Example
//!
//! ```toml
//! [connection]
//! baud_rate = 9600
//! reset_delay_ms = 2000
//!
//! [protocol]
//! generation = "status_code"
//! layout = "device_info_first"
//!
//! [discovery]
//! exclude_ports = ["/dev/ttyS0"]
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, validate, ConfigLoader,
};
pub use schema::{
    Config, ConnectionConfig, DiscoveryConfig, GenerationSetting, IdentityQuery, LogFormat,
    LoggingConfig, ProtocolConfig, ReservedLayout,
};
