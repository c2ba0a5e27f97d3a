//! Method table negotiated from the device.
//!
//! The firmware answers the "list methods" request with an object mapping
//! each wire name to a small integer id. An entry may instead be an object
//! carrying the id and the method's parameter positions:
//!
//! ```json
//! {"getDeviceId": 1, "setLed": {"id": 2, "parameters": {"led": 0, "state": 1}}}
//! ```

use crate::error::{DeviceError, ProtocolError};
use crate::naming::Naming;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

pub type MethodId = u64;

/// How a caller names the method to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodRef {
    /// Call name (`set_led`) or wire name (`setLed`).
    Name(String),
    Id(MethodId),
}

impl From<&str> for MethodRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for MethodRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<MethodId> for MethodRef {
    fn from(id: MethodId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// One remotely invocable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub id: MethodId,
    pub wire_name: String,
    pub call_name: String,
    /// Parameter names in positional order, if declared.
    pub parameters: Option<Vec<String>>,
}

impl MethodInfo {
    /// Arrange named arguments in the method's declared positional order.
    pub fn positional(&self, named: &Map<String, Value>) -> Result<Vec<Value>, DeviceError> {
        let order = self.parameters.as_ref().ok_or_else(|| {
            DeviceError::invalid_arguments(
                &self.call_name,
                "no parameter order declared; pass positional arguments",
            )
        })?;

        if let Some(unknown) = named.keys().find(|k| !order.contains(k)) {
            return Err(DeviceError::invalid_arguments(
                &self.call_name,
                format!("unknown parameter '{unknown}'"),
            ));
        }

        order
            .iter()
            .map(|name| {
                named.get(name).cloned().ok_or_else(|| {
                    DeviceError::invalid_arguments(
                        &self.call_name,
                        format!("missing parameter '{name}'"),
                    )
                })
            })
            .collect()
    }
}

/// Bidirectional id ↔ name mapping for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodTable {
    by_id: BTreeMap<MethodId, MethodInfo>,
    by_wire: HashMap<String, MethodId>,
    by_call: HashMap<String, MethodId>,
}

impl MethodTable {
    /// Build the table from the device's method listing.
    pub fn from_listing(listing: &Value, naming: &dyn Naming) -> Result<Self, ProtocolError> {
        let entries = listing.as_object().ok_or_else(|| {
            ProtocolError::InvalidMethodTable(format!("expected an object, got {listing}"))
        })?;

        let mut table = Self::default();
        for (wire_name, entry) in entries {
            let (id, parameters) = parse_entry(wire_name, entry)?;
            table.insert(MethodInfo {
                id,
                wire_name: wire_name.clone(),
                call_name: naming.to_call_name(wire_name),
                parameters,
            })?;
            if naming.to_wire_name(&naming.to_call_name(wire_name)) != *wire_name {
                debug!(wire_name, "call name does not convert back to the wire name");
            }
        }
        Ok(table)
    }

    fn insert(&mut self, info: MethodInfo) -> Result<(), ProtocolError> {
        if let Some(existing) = self.by_id.get(&info.id) {
            return Err(ProtocolError::InvalidMethodTable(format!(
                "'{}' and '{}' share id {}",
                existing.wire_name, info.wire_name, info.id
            )));
        }
        if let Some(other) = self.by_call.get(&info.call_name) {
            return Err(ProtocolError::InvalidMethodTable(format!(
                "'{}' and '{}' both map to call name '{}'",
                self.by_id[other].wire_name, info.wire_name, info.call_name
            )));
        }
        self.by_wire.insert(info.wire_name.clone(), info.id);
        self.by_call.insert(info.call_name.clone(), info.id);
        self.by_id.insert(info.id, info);
        Ok(())
    }

    /// Declare the parameter order of a method the firmware lists without one.
    ///
    /// `order` maps each parameter name to its explicit position.
    pub fn with_parameter_order<I, S>(mut self, method: &str, order: I) -> Result<Self, DeviceError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let id = self
            .lookup_id(method)
            .ok_or_else(|| DeviceError::UnknownMethod(method.to_string()))?;
        let positions: BTreeMap<usize, String> = collect_positions(
            order.into_iter().map(|(name, pos)| (name.into(), pos)),
        )
        .map_err(|message| DeviceError::invalid_arguments(method, message))?;
        if let Some(info) = self.by_id.get_mut(&id) {
            info.parameters = Some(positions.into_values().collect());
        }
        Ok(self)
    }

    fn lookup_id(&self, name: &str) -> Option<MethodId> {
        self.by_call
            .get(name)
            .or_else(|| self.by_wire.get(name))
            .copied()
    }

    /// Resolve a call name, wire name or id.
    pub fn resolve(&self, target: &MethodRef) -> Option<&MethodInfo> {
        match target {
            MethodRef::Id(id) => self.by_id.get(id),
            MethodRef::Name(name) => self.lookup_id(name).and_then(|id| self.by_id.get(&id)),
        }
    }

    pub fn wire_name(&self, id: MethodId) -> Option<&str> {
        self.by_id.get(&id).map(|m| m.wire_name.as_str())
    }

    pub fn id(&self, name: &str) -> Option<MethodId> {
        self.lookup_id(name)
    }

    /// Call names of every method.
    pub fn call_names(&self) -> BTreeSet<String> {
        self.by_call.keys().cloned().collect()
    }

    /// Methods in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &MethodInfo> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn parse_entry(
    wire_name: &str,
    entry: &Value,
) -> Result<(MethodId, Option<Vec<String>>), ProtocolError> {
    let invalid = |what: &str| {
        ProtocolError::InvalidMethodTable(format!("'{wire_name}': {what}, got {entry}"))
    };
    match entry {
        Value::Number(n) => n
            .as_u64()
            .map(|id| (id, None))
            .ok_or_else(|| invalid("expected a non-negative integer id")),
        Value::Object(fields) => {
            let id = fields
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid("missing integer 'id'"))?;
            let parameters = match fields.get("parameters") {
                None | Some(Value::Null) => None,
                Some(Value::Array(names)) => Some(
                    names
                        .iter()
                        .map(|n| n.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| invalid("parameter names must be strings"))?,
                ),
                Some(Value::Object(positions)) => {
                    let pairs = positions
                        .iter()
                        .map(|(name, pos)| {
                            pos.as_u64()
                                .and_then(|p| usize::try_from(p).ok())
                                .map(|p| (name.clone(), p))
                                .ok_or_else(|| invalid("parameter positions must be integers"))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let ordered = collect_positions(pairs)
                        .map_err(ProtocolError::InvalidMethodTable)?;
                    Some(ordered.into_values().collect())
                }
                Some(_) => return Err(invalid("'parameters' must be an array or object")),
            };
            Ok((id, parameters))
        }
        _ => Err(invalid("expected an id")),
    }
}

fn collect_positions(
    pairs: impl IntoIterator<Item = (String, usize)>,
) -> Result<BTreeMap<usize, String>, String> {
    let mut positions = BTreeMap::new();
    for (name, pos) in pairs {
        if let Some(other) = positions.insert(pos, name.clone()) {
            return Err(format!("'{other}' and '{name}' share position {pos}"));
        }
    }
    // Positions must be exactly 0..n
    if let Some((expected, (pos, name))) = positions
        .iter()
        .enumerate()
        .find(|(expected, (pos, _))| *expected != **pos)
    {
        return Err(format!(
            "'{name}' is at position {pos}, expected {expected}; positions must be contiguous from 0"
        ));
    }
    Ok(positions)
}
