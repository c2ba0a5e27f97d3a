//! Request/response envelope.
//!
//! Requests are compact JSON arrays, `[id, arg1, arg2, ...]`, one per line.
//! Responses are a single JSON object per line in one of two generations:
//!
//! - [`Generation::StatusCode`]: `{"status": s, "cmd_id": id, ...payload}`;
//!   the call failed when `status` equals the device's error code, with an
//!   optional `err_msg`.
//! - [`Generation::JsonRpc`]: `{"id": id, "result": r}` or
//!   `{"id": id, "error": {"message", "data", "code"}}`.
//!
//! A [`Codec`] is fixed to one generation per session.

use crate::error::{DeviceError, DeviceReport, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Wire protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// `status` / `cmd_id` / `err_msg` responses with shrinking payloads.
    StatusCode,
    /// `id` / `result` / `error` responses.
    JsonRpc,
}

impl Generation {
    /// Guess the generation from a parsed response object.
    pub fn detect(response: &Map<String, Value>) -> Self {
        if response.contains_key("status") {
            Self::StatusCode
        } else {
            Self::JsonRpc
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusCode => write!(f, "status_code"),
            Self::JsonRpc => write!(f, "json_rpc"),
        }
    }
}

/// Correlation id: a method id, or a wire method name for firmware that
/// accepts named requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Id(u64),
    Name(String),
}

impl RequestId {
    /// Whether an echoed id refers to this request.
    pub fn matches(&self, echoed: &Value) -> bool {
        match (self, echoed) {
            (Self::Id(id), Value::Number(n)) => n.as_u64() == Some(*id),
            (Self::Name(name), Value::String(s)) => name == s,
            _ => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Id(id) => Value::from(*id),
            Self::Name(name) => Value::from(name.as_str()),
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self::Id),
            Value::String(s) => Some(Self::Name(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RequestId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Serializes requests and validates responses for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Codec {
    generation: Generation,
    /// Status value the device uses to flag an error (status-code generation).
    error_status: Option<Value>,
}

impl Codec {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            error_status: None,
        }
    }

    /// Set the status value that marks a failed call.
    pub fn with_error_status(mut self, status: Value) -> Self {
        self.error_status = Some(status);
        self
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn error_status(&self) -> Option<&Value> {
        self.error_status.as_ref()
    }

    /// Encode a request line, newline included.
    pub fn encode(&self, id: &RequestId, args: &[Value]) -> String {
        encode_request(id, args)
    }

    /// Decode and validate the response to the request sent as `expected`.
    ///
    /// `line` is `None` when the read timed out.
    pub fn decode(&self, line: Option<&[u8]>, expected: &RequestId) -> Result<Value, DeviceError> {
        let mut response = parse_response(line)?;
        match self.generation {
            Generation::StatusCode => self
                .decode_status_code(&mut response, expected)
                .map(collapse_payload),
            Generation::JsonRpc => decode_json_rpc(&mut response, expected),
        }
    }

    /// Like [`Codec::decode`], but a status-code payload is returned as the
    /// full object. Handshake records (method listing, response codes,
    /// identity) are read this way.
    pub fn decode_record(
        &self,
        line: Option<&[u8]>,
        expected: &RequestId,
    ) -> Result<Value, DeviceError> {
        let mut response = parse_response(line)?;
        match self.generation {
            Generation::StatusCode => self
                .decode_status_code(&mut response, expected)
                .map(Value::Object),
            Generation::JsonRpc => decode_json_rpc(&mut response, expected),
        }
    }

    fn decode_status_code(
        &self,
        response: &mut Map<String, Value>,
        expected: &RequestId,
    ) -> Result<Map<String, Value>, DeviceError> {
        let status = response
            .remove("status")
            .ok_or(ProtocolError::MissingField("status"))?;
        let echoed = response
            .remove("cmd_id")
            .or_else(|| response.remove("id"))
            .ok_or(ProtocolError::MissingField("cmd_id"))?;
        check_id(expected, echoed)?;

        if self.error_status.as_ref() == Some(&status) {
            let message = match response.remove("err_msg") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "Error message missing.".to_string(),
            };
            return Err(DeviceError::DeviceReported(DeviceReport {
                message: Some(message),
                data: None,
                code: Some(status),
            }));
        }

        Ok(std::mem::take(response))
    }
}

fn decode_json_rpc(
    response: &mut Map<String, Value>,
    expected: &RequestId,
) -> Result<Value, DeviceError> {
    let echoed = response
        .remove("id")
        .ok_or(ProtocolError::MissingField("id"))?;
    check_id(expected, echoed)?;

    if let Some(error) = response.remove("error") {
        return Err(DeviceError::DeviceReported(error_report(error)));
    }

    response
        .remove("result")
        .ok_or_else(|| ProtocolError::MissingField("result").into())
}

fn error_report(error: Value) -> DeviceReport {
    match error {
        Value::Object(mut fields) => DeviceReport {
            message: fields.remove("message").map(|m| match m {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            data: fields.remove("data"),
            code: fields.remove("code"),
        },
        Value::String(s) => DeviceReport {
            message: Some(s),
            ..Default::default()
        },
        other => DeviceReport {
            message: Some(other.to_string()),
            ..Default::default()
        },
    }
}

fn check_id(expected: &RequestId, echoed: Value) -> Result<(), ProtocolError> {
    if expected.matches(&echoed) {
        Ok(())
    } else {
        Err(ProtocolError::IdMismatch {
            expected: expected.clone(),
            received: echoed,
        })
    }
}

/// Parse one response line into its JSON object.
pub fn parse_response(line: Option<&[u8]>) -> Result<Map<String, Value>, ProtocolError> {
    let bytes = line.ok_or(ProtocolError::EmptyResponse)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::malformed(String::from_utf8_lossy(bytes), e))?
        .trim();
    if text.is_empty() {
        return Err(ProtocolError::EmptyResponse);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::malformed(
            text,
            format!("expected an object, got {other}"),
        )),
        Err(e) => Err(ProtocolError::malformed(text, e)),
    }
}

/// Encode `[id, args...]` as a compact line, newline included.
pub fn encode_request(id: &RequestId, args: &[Value]) -> String {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(id.to_json());
    items.extend_from_slice(args);
    let mut line = Value::Array(items).to_string();
    line.push('\n');
    line
}

/// Inverse of [`encode_request`]; this is what the firmware side parses.
pub fn decode_request(line: &str) -> Result<(RequestId, Vec<Value>), ProtocolError> {
    let text = line.trim();
    let mut items = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            return Err(ProtocolError::malformed(
                text,
                format!("expected an array, got {other}"),
            ))
        }
        Err(e) => return Err(ProtocolError::malformed(text, e)),
    };
    if items.is_empty() {
        return Err(ProtocolError::MissingField("id"));
    }
    let first = items.remove(0);
    let id = RequestId::from_json(&first)
        .ok_or_else(|| ProtocolError::malformed(text, format!("invalid request id {first}")))?;
    Ok((id, items))
}

/// Shrink a status-code payload once the correlation fields are gone.
///
/// No fields: null. One field: its bare value. All fields empty (empty text
/// or null): the sorted field names, i.e. "flags set, no values". Otherwise
/// the map.
pub fn collapse_payload(payload: Map<String, Value>) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    if payload.len() == 1 {
        return payload
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .unwrap_or(Value::Null);
    }

    let all_empty = payload
        .values()
        .all(|v| v.is_null() || v.as_str().is_some_and(str::is_empty));
    if all_empty {
        let mut names: Vec<String> = payload.into_iter().map(|(k, _)| k).collect();
        names.sort();
        return Value::Array(names.into_iter().map(Value::String).collect());
    }

    Value::Object(payload)
}
