//! Configuration schema definitions.
//!
//! Every section has serde defaults, so a config file only needs the keys it
//! changes.

use crate::codec::Generation;
use crate::identity::Identity;
use crate::port::ConnectionParams;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial connection and timing
    pub connection: ConnectionConfig,
    /// Wire protocol and handshake
    pub protocol: ProtocolConfig,
    /// Port scanning
    pub discovery: DiscoveryConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// Connection section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub baud_rate: u32,
    /// Per-read timeout for calls, in milliseconds
    pub read_timeout_ms: u64,
    /// Per-read timeout during the handshake, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Minimum spacing between writes, in milliseconds
    pub write_delay_ms: u64,
    /// Settle delay after opening the port, in milliseconds
    pub reset_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let params = ConnectionParams::default();
        Self {
            baud_rate: params.baud_rate,
            read_timeout_ms: params.read_timeout.as_millis() as u64,
            handshake_timeout_ms: params.handshake_timeout.as_millis() as u64,
            write_delay_ms: params.write_delay.as_millis() as u64,
            reset_delay_ms: params.reset_delay.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            write_delay: Duration::from_millis(self.write_delay_ms),
            reset_delay: Duration::from_millis(self.reset_delay_ms),
        }
    }
}

/// Which protocol generation a session speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationSetting {
    /// Detect from the method listing response
    #[default]
    Auto,
    StatusCode,
    JsonRpc,
}

impl GenerationSetting {
    pub fn fixed(self) -> Option<Generation> {
        match self {
            Self::Auto => None,
            Self::StatusCode => Some(Generation::StatusCode),
            Self::JsonRpc => Some(Generation::JsonRpc),
        }
    }
}

/// How the device identity is requested after the method table is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "value")]
pub enum IdentityQuery {
    /// Call a listed method by wire or call name
    Method(String),
    /// Send a reserved request id
    Id(u64),
}

impl Default for IdentityQuery {
    fn default() -> Self {
        Self::Method("getDeviceId".to_string())
    }
}

/// Which reserved ids a firmware family answers during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedLayout {
    /// Id 0 lists methods; the identity comes from a listed method.
    MethodsFirst,
    /// Id 0 returns the device info record, id 1 lists methods.
    DeviceInfoFirst,
}

impl ReservedLayout {
    /// The first request of every handshake.
    pub const FIRST_ID: u64 = 0;
    /// Method listing under [`ReservedLayout::DeviceInfoFirst`].
    pub const DEVICE_INFO_LIST_ID: u64 = 1;

    pub fn list_methods_id(self) -> u64 {
        match self {
            Self::MethodsFirst => Self::FIRST_ID,
            Self::DeviceInfoFirst => Self::DEVICE_INFO_LIST_ID,
        }
    }

    /// Pick the layout from the generation and the record returned by id 0.
    ///
    /// Status-code firmware always puts device info at id 0. Under JSON-RPC
    /// the record is device info when it carries identity keys.
    pub fn detect(generation: Generation, first_record: &Value) -> Self {
        if generation == Generation::StatusCode || Identity::is_identity_record(first_record) {
            Self::DeviceInfoFirst
        } else {
            Self::MethodsFirst
        }
    }
}

/// Protocol section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub generation: GenerationSetting,
    /// Reserved-id layout; unset detects it from the first response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<ReservedLayout>,
    /// Reserved id of the "list methods" request; overrides the layout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_methods_id: Option<u64>,
    /// Reserved id of the "response codes" request (status-code generation)
    pub response_codes_id: u64,
    /// How to fetch the identity; unset uses the layout's default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityQuery>,
    /// Host-declared parameter positions, per method
    pub parameter_orders: BTreeMap<String, BTreeMap<String, usize>>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            generation: GenerationSetting::Auto,
            layout: None,
            list_methods_id: None,
            response_codes_id: 2,
            identity: None,
            parameter_orders: BTreeMap::new(),
        }
    }
}

/// Discovery section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Probe exactly these ports instead of enumerating
    pub ports: Option<Vec<String>>,
    /// Regex a port name must match; unset uses the platform default
    pub include_pattern: Option<String>,
    /// Ports never probed
    pub exclude_ports: Vec<String>,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.connection.reset_delay_ms, 2000);
        assert_eq!(config.protocol.list_methods_id, None);
        assert_eq!(config.protocol.layout, None);
        assert_eq!(config.protocol.generation, GenerationSetting::Auto);
        assert_eq!(config.protocol.identity, None);
    }

    #[test]
    fn test_layout_detection() {
        let listing = json!({"getMethodIds": 0, "getDeviceId": 1});
        let info = json!({"name": "pump", "serial_number": 4});
        assert_eq!(
            ReservedLayout::detect(Generation::JsonRpc, &listing),
            ReservedLayout::MethodsFirst
        );
        assert_eq!(
            ReservedLayout::detect(Generation::JsonRpc, &info),
            ReservedLayout::DeviceInfoFirst
        );
        // Status-code firmware puts device info at id 0 whatever it contains
        assert_eq!(
            ReservedLayout::detect(Generation::StatusCode, &listing),
            ReservedLayout::DeviceInfoFirst
        );
        assert_eq!(ReservedLayout::DeviceInfoFirst.list_methods_id(), 1);
    }

    #[test]
    fn test_connection_params() {
        let config = ConnectionConfig {
            baud_rate: 9600,
            reset_delay_ms: 0,
            ..Default::default()
        };
        let params = config.params();
        assert_eq!(params.baud_rate, 9600);
        assert_eq!(params.reset_delay, Duration::ZERO);
        assert_eq!(params.read_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[connection]"));
        assert!(toml_str.contains("[protocol]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [connection]
            baud_rate = 9600

            [protocol]
            generation = "status_code"
            layout = "device_info_first"
            identity = { by = "id", value = 0 }

            [protocol.parameter_orders.setLed]
            led = 0
            state = 1

            [discovery]
            exclude_ports = ["/dev/ttyS0"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.baud_rate, 9600);
        assert_eq!(config.protocol.generation.fixed(), Some(Generation::StatusCode));
        assert_eq!(config.protocol.layout, Some(ReservedLayout::DeviceInfoFirst));
        assert_eq!(config.protocol.identity, Some(IdentityQuery::Id(0)));
        assert_eq!(config.protocol.parameter_orders["setLed"]["state"], 1);
        assert_eq!(config.discovery.exclude_ports, vec!["/dev/ttyS0"]);
        // Defaults should still work
        assert_eq!(config.logging.level, "info");
    }
}
