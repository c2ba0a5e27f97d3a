//! Device identity as reported by the firmware.
//!
//! Boards report their model (or name), an optional form factor and a serial
//! number. Older firmware reports `model_number`, newer firmware `name`; both
//! land in [`Identity::name`]. Values may be integers or text.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const NAME_KEYS: &[&str] = &["name", "model_number", "model"];
const FORM_FACTOR_KEYS: &[&str] = &["form_factor"];
const SERIAL_NUMBER_KEYS: &[&str] = &["serial_number"];
const FIRMWARE_KEYS: &[&str] = &["firmware_version", "firmware_number", "firmware"];

/// One identity field value. Integers order before text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityValue {
    Number(i64),
    Text(String),
}

impl IdentityValue {
    /// Convert a device-reported JSON value. `null` means "not reported".
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Number(n) => Some(
                n.as_i64()
                    .map(Self::Number)
                    .unwrap_or_else(|| Self::Text(n.to_string())),
            ),
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    /// Parse a value typed by a user: integers become `Number`, anything else `Text`.
    pub fn parse(input: &str) -> Self {
        input
            .trim()
            .parse::<i64>()
            .map(Self::Number)
            .unwrap_or_else(|_| Self::Text(input.to_string()))
    }
}

impl fmt::Display for IdentityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for IdentityValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for IdentityValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for IdentityValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for IdentityValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for IdentityValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The identity fields discovery can filter and the registry can look up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    Name,
    FormFactor,
    SerialNumber,
}

impl IdentityField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::FormFactor => "form_factor",
            Self::SerialNumber => "serial_number",
        }
    }
}

/// Device-reported identity. Immutable once the handshake has completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: Option<IdentityValue>,
    pub form_factor: Option<IdentityValue>,
    pub serial_number: Option<IdentityValue>,
    pub firmware: Option<IdentityValue>,
}

impl Identity {
    pub fn new(name: impl Into<IdentityValue>, serial_number: impl Into<IdentityValue>) -> Self {
        Self {
            name: Some(name.into()),
            serial_number: Some(serial_number.into()),
            ..Default::default()
        }
    }

    pub fn with_form_factor(mut self, form_factor: impl Into<IdentityValue>) -> Self {
        self.form_factor = Some(form_factor.into());
        self
    }

    /// Build an identity from the result of the identity query.
    pub fn from_response(value: &Value) -> Result<Self, ProtocolError> {
        let map = value.as_object().ok_or_else(|| {
            ProtocolError::InvalidIdentity(format!("expected an object, got {value}"))
        })?;
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| map.get(*k))
                .and_then(IdentityValue::from_json)
        };
        Ok(Self {
            name: pick(NAME_KEYS),
            form_factor: pick(FORM_FACTOR_KEYS),
            serial_number: pick(SERIAL_NUMBER_KEYS),
            firmware: pick(FIRMWARE_KEYS),
        })
    }

    /// Whether `value` is an object carrying any name, form factor or serial
    /// number key.
    pub fn is_identity_record(value: &Value) -> bool {
        value.as_object().is_some_and(|map| {
            [NAME_KEYS, FORM_FACTOR_KEYS, SERIAL_NUMBER_KEYS]
                .iter()
                .flat_map(|keys| keys.iter())
                .any(|k| map.contains_key(*k))
        })
    }

    pub fn get(&self, field: IdentityField) -> Option<&IdentityValue> {
        match field {
            IdentityField::Name => self.name.as_ref(),
            IdentityField::FormFactor => self.form_factor.as_ref(),
            IdentityField::SerialNumber => self.serial_number.as_ref(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(v: &Option<IdentityValue>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "name={}, form_factor={}, serial_number={}",
            show(&self.name),
            show(&self.form_factor),
            show(&self.serial_number)
        )
    }
}
