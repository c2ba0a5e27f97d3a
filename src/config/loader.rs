//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, GenerationSetting, LogFormat, ReservedLayout};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "REMOTE_DEVICE";

/// Config file name in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "remote_device.toml";

/// Config file name inside the per-user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

const APP_DIR_NAME: &str = "remote-device";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "REMOTE_DEVICE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `REMOTE_DEVICE_CONFIG` environment variable (explicit path)
    /// 2. `./remote_device.toml`
    /// 3. `$XDG_CONFIG_HOME/remote-device/config.toml` (or `~/.config/...`,
    ///    `%APPDATA%\remote-device\config.toml` on Windows)
    /// 4. Built-in defaults
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("No config file path set".to_string()))?;

        save_to_file(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            validate(&config)?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|p| p.exists())
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn env_var(key: &str) -> Option<(String, String)> {
    let name = format!("{ENV_PREFIX}_{key}");
    std::env::var(&name).ok().map(|value| (name, value))
}

fn parse_env<T: std::str::FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    match env_var(key) {
        Some((name, value)) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(name, what)),
        None => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Variables follow the pattern `REMOTE_DEVICE_<SECTION>_<KEY>`, e.g.
/// `REMOTE_DEVICE_CONNECTION_BAUD_RATE=9600` or
/// `REMOTE_DEVICE_DISCOVERY_PORTS=/dev/ttyACM0,/dev/ttyACM1`.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    let connection = &mut config.connection;
    if let Some(v) = parse_env("CONNECTION_BAUD_RATE", "Invalid baud rate")? {
        connection.baud_rate = v;
    }
    if let Some(v) = parse_env("CONNECTION_READ_TIMEOUT_MS", "Invalid timeout")? {
        connection.read_timeout_ms = v;
    }
    if let Some(v) = parse_env("CONNECTION_HANDSHAKE_TIMEOUT_MS", "Invalid timeout")? {
        connection.handshake_timeout_ms = v;
    }
    if let Some(v) = parse_env("CONNECTION_WRITE_DELAY_MS", "Invalid delay")? {
        connection.write_delay_ms = v;
    }
    if let Some(v) = parse_env("CONNECTION_RESET_DELAY_MS", "Invalid delay")? {
        connection.reset_delay_ms = v;
    }

    if let Some((name, value)) = env_var("PROTOCOL_GENERATION") {
        config.protocol.generation = match value.trim().to_lowercase().as_str() {
            "auto" => GenerationSetting::Auto,
            "status_code" => GenerationSetting::StatusCode,
            "json_rpc" => GenerationSetting::JsonRpc,
            _ => {
                return Err(ConfigError::env_parse(
                    name,
                    "Expected auto, status_code or json_rpc",
                ))
            }
        };
    }
    if let Some((name, value)) = env_var("PROTOCOL_LAYOUT") {
        config.protocol.layout = match value.trim().to_lowercase().as_str() {
            "auto" => None,
            "methods_first" => Some(ReservedLayout::MethodsFirst),
            "device_info_first" => Some(ReservedLayout::DeviceInfoFirst),
            _ => {
                return Err(ConfigError::env_parse(
                    name,
                    "Expected auto, methods_first or device_info_first",
                ))
            }
        };
    }

    if let Some((_, value)) = env_var("DISCOVERY_PORTS") {
        config.discovery.ports = Some(split_list(&value));
    }
    if let Some((_, value)) = env_var("DISCOVERY_INCLUDE_PATTERN") {
        config.discovery.include_pattern = Some(value);
    }
    if let Some((_, value)) = env_var("DISCOVERY_EXCLUDE_PORTS") {
        config.discovery.exclude_ports = split_list(&value);
    }

    if let Some((_, value)) = env_var("LOGGING_LEVEL") {
        config.logging.level = value;
    }
    if let Some((name, value)) = env_var("LOGGING_FORMAT") {
        config.logging.format = match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env_parse(name, "Expected json, pretty or compact")),
        };
    }

    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reject values that would make every session fail.
pub fn validate(config: &Config) -> ConfigResult<()> {
    if config.connection.baud_rate == 0 {
        return Err(ConfigError::validation(
            "connection.baud_rate",
            "must be greater than zero",
        ));
    }
    if config.connection.read_timeout_ms == 0 || config.connection.handshake_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "connection.read_timeout_ms",
            "timeouts must be greater than zero",
        ));
    }
    if let Some(pattern) = &config.discovery.include_pattern {
        Regex::new(pattern)
            .map_err(|e| ConfigError::validation("discovery.include_pattern", e.to_string()))?;
    }
    let protocol = &config.protocol;
    if protocol.generation != GenerationSetting::JsonRpc {
        let reserved = match protocol.list_methods_id {
            Some(id) => vec![id],
            None => vec![ReservedLayout::FIRST_ID, ReservedLayout::DEVICE_INFO_LIST_ID],
        };
        if reserved.contains(&protocol.response_codes_id) {
            return Err(ConfigError::validation(
                "protocol.response_codes_id",
                "must differ from the method listing and device info ids",
            ));
        }
    }
    Ok(())
}

/// Default directory for a per-user config file.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Default path for a per-user config file.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().connection.baud_rate, 115_200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("REMOTE_DEVICE_CONNECTION_BAUD_RATE", "9600");
        env::set_var("REMOTE_DEVICE_DISCOVERY_PORTS", "COM3, COM4");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().connection.baud_rate, 9600);
        assert_eq!(
            loader.config().discovery.ports,
            Some(vec!["COM3".to_string(), "COM4".to_string()])
        );

        env::remove_var("REMOTE_DEVICE_CONNECTION_BAUD_RATE");
        env::remove_var("REMOTE_DEVICE_DISCOVERY_PORTS");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        env::set_var("REMOTE_DEVICE_PROTOCOL_GENERATION", "v3");
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config);
        env::remove_var("REMOTE_DEVICE_PROTOCOL_GENERATION");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.connection.baud_rate = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.discovery.include_pattern = Some("tty(".into());
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.protocol.response_codes_id = ReservedLayout::DEVICE_INFO_LIST_ID;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.protocol.list_methods_id = Some(5);
        config.protocol.response_codes_id = 1;
        assert!(validate(&config).is_ok());
        config.protocol.response_codes_id = 5;
        assert!(validate(&config).is_err());

        assert!(validate(&Config::default()).is_ok());
    }
}
