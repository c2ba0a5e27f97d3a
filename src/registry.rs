//! Collection of open sessions keyed by device identity.

use crate::discovery::DeviceMatch;
use crate::error::{DeviceError, DeviceResult};
use crate::identity::{IdentityField, IdentityValue};
use crate::session::Session;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of looking a device up by one identity field.
#[derive(Debug)]
pub enum Lookup<'a> {
    None,
    One(&'a Session),
    Many(Vec<&'a Session>),
}

impl<'a> Lookup<'a> {
    /// The single session, if exactly one matched.
    pub fn one(self) -> Option<&'a Session> {
        match self {
            Self::One(session) => Some(session),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::One(_) => 1,
            Self::Many(sessions) => sessions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Sessions grouped by name, then serial number.
pub type Grouped<'a> =
    BTreeMap<Option<IdentityValue>, BTreeMap<Option<IdentityValue>, Vec<&'a Session>>>;

/// Owns the sessions of one discovery pass.
///
/// Sessions stay sorted by name, serial number, form factor and port, so
/// iteration order does not depend on probe order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    sessions: Vec<Session>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. A second session on the same port is rejected.
    pub fn insert(&mut self, session: Session) -> DeviceResult<()> {
        if self.sessions.iter().any(|s| s.port() == session.port()) {
            return Err(DeviceError::DuplicatePort(session.port().to_string()));
        }
        debug!(port = session.port(), identity = %session.identity(), "Registering device");
        let key = sort_key(&session);
        let at = self
            .sessions
            .partition_point(|existing| sort_key(existing) <= key);
        self.sessions.insert(at, session);
        Ok(())
    }

    /// Sessions whose `field` equals `value`.
    pub fn get(&self, field: IdentityField, value: &IdentityValue) -> Lookup<'_> {
        let mut found: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|s| s.identity().get(field) == Some(value))
            .collect();
        match found.len() {
            0 => Lookup::None,
            1 => Lookup::One(found.remove(0)),
            _ => Lookup::Many(found),
        }
    }

    pub fn get_by_name(&self, name: impl Into<IdentityValue>) -> Lookup<'_> {
        self.get(IdentityField::Name, &name.into())
    }

    pub fn get_by_form_factor(&self, form_factor: impl Into<IdentityValue>) -> Lookup<'_> {
        self.get(IdentityField::FormFactor, &form_factor.into())
    }

    pub fn get_by_serial_number(&self, serial_number: impl Into<IdentityValue>) -> Lookup<'_> {
        self.get(IdentityField::SerialNumber, &serial_number.into())
    }

    /// The one session whose `field` equals `value`, for making calls.
    pub fn one_mut(
        &mut self,
        field: IdentityField,
        value: &IdentityValue,
    ) -> DeviceResult<&mut Session> {
        let positions: Vec<usize> = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.identity().get(field) == Some(value))
            .map(|(i, _)| i)
            .collect();
        match positions.as_slice() {
            [] => Err(DeviceError::DiscoveryNotFound {
                tried: self.ports(),
            }),
            [i] => Ok(&mut self.sessions[*i]),
            _ => Err(DeviceError::DiscoveryAmbiguous {
                matches: positions
                    .iter()
                    .map(|&i| device_match(&self.sessions[i]))
                    .collect(),
            }),
        }
    }

    pub fn get_by_port(&self, port: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.port() == port)
    }

    pub fn get_by_port_mut(&mut self, port: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.port() == port)
    }

    /// Take a session out of the registry without closing it.
    pub fn remove(&mut self, port: &str) -> Option<Session> {
        let at = self.sessions.iter().position(|s| s.port() == port)?;
        Some(self.sessions.remove(at))
    }

    /// Name → serial number → sessions.
    pub fn grouped(&self) -> Grouped<'_> {
        let mut groups = Grouped::new();
        for session in &self.sessions {
            let identity = session.identity();
            groups
                .entry(identity.name.clone())
                .or_default()
                .entry(identity.serial_number.clone())
                .or_default()
                .push(session);
        }
        groups
    }

    /// Port and identity of every session, in registry order.
    pub fn identities(&self) -> Vec<DeviceMatch> {
        self.sessions.iter().map(device_match).collect()
    }

    pub fn ports(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.port().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session. The registry keeps them, closed.
    pub fn close_all(&mut self) {
        for session in &mut self.sessions {
            session.close();
        }
    }

    pub fn into_sessions(self) -> Vec<Session> {
        self.sessions
    }
}

fn device_match(session: &Session) -> DeviceMatch {
    DeviceMatch::new(session.port(), session.identity().clone())
}

type SortKey = (
    Option<IdentityValue>,
    Option<IdentityValue>,
    Option<IdentityValue>,
    String,
);

fn sort_key(session: &Session) -> SortKey {
    let identity = session.identity();
    (
        identity.name.clone(),
        identity.serial_number.clone(),
        identity.form_factor.clone(),
        session.port().to_string(),
    )
}
