//! Probing one port for a matching device.

use crate::identity::{Identity, IdentityField, IdentityValue};
use crate::port::TransportOpener;
use crate::session::{Session, SessionOptions};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Accepted values per identity field.
///
/// An unset field accepts anything, including a device that does not report
/// it. A set field requires the device to report one of its values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFilter {
    pub name: Option<BTreeSet<IdentityValue>>,
    pub form_factor: Option<BTreeSet<IdentityValue>>,
    pub serial_number: Option<BTreeSet<IdentityValue>>,
}

impl IdentityFilter {
    /// Filter accepting every device.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn name(self, value: impl Into<IdentityValue>) -> Self {
        self.accept(IdentityField::Name, value)
    }

    pub fn form_factor(self, value: impl Into<IdentityValue>) -> Self {
        self.accept(IdentityField::FormFactor, value)
    }

    pub fn serial_number(self, value: impl Into<IdentityValue>) -> Self {
        self.accept(IdentityField::SerialNumber, value)
    }

    /// Add `value` to the accepted set of `field`.
    pub fn accept(mut self, field: IdentityField, value: impl Into<IdentityValue>) -> Self {
        self.slot(field)
            .get_or_insert_with(BTreeSet::new)
            .insert(value.into());
        self
    }

    fn slot(&mut self, field: IdentityField) -> &mut Option<BTreeSet<IdentityValue>> {
        match field {
            IdentityField::Name => &mut self.name,
            IdentityField::FormFactor => &mut self.form_factor,
            IdentityField::SerialNumber => &mut self.serial_number,
        }
    }

    fn accepted(&self, field: IdentityField) -> Option<&BTreeSet<IdentityValue>> {
        match field {
            IdentityField::Name => self.name.as_ref(),
            IdentityField::FormFactor => self.form_factor.as_ref(),
            IdentityField::SerialNumber => self.serial_number.as_ref(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.name.is_none() && self.form_factor.is_none() && self.serial_number.is_none()
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        [
            IdentityField::Name,
            IdentityField::FormFactor,
            IdentityField::SerialNumber,
        ]
        .into_iter()
        .all(|field| match self.accepted(field) {
            None => true,
            Some(accepted) => identity
                .get(field)
                .is_some_and(|value| accepted.contains(value)),
        })
    }
}

impl fmt::Display for IdentityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("any");
        }
        let mut parts = Vec::new();
        for field in [
            IdentityField::Name,
            IdentityField::FormFactor,
            IdentityField::SerialNumber,
        ] {
            if let Some(values) = self.accepted(field) {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                parts.push(format!("{} in [{}]", field.as_str(), values.join(", ")));
            }
        }
        f.write_str(&parts.join(", "))
    }
}

/// A port and the identity of the device found on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    pub port: String,
    pub identity: Identity,
}

impl DeviceMatch {
    pub fn new(port: impl Into<String>, identity: Identity) -> Self {
        Self {
            port: port.into(),
            identity,
        }
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.port, self.identity)
    }
}

/// Result of probing one port.
#[derive(Debug)]
pub enum ProbeOutcome {
    Matched(Session),
    /// Nothing usable on the port; the port has been released.
    NoMatch { port: String, reason: String },
}

/// Open `port`, handshake and test the identity against `filter`.
///
/// Open and handshake failures are reported as `NoMatch`, not as errors.
pub fn probe(
    opener: &dyn TransportOpener,
    port: &str,
    options: &SessionOptions,
    filter: &IdentityFilter,
) -> ProbeOutcome {
    let mut session = match Session::open(opener, port, options) {
        Ok(session) => session,
        Err(e) => {
            warn!(port, error = %e, "Probe failed");
            return ProbeOutcome::NoMatch {
                port: port.to_string(),
                reason: e.to_string(),
            };
        }
    };

    if filter.matches(session.identity()) {
        debug!(port, identity = %session.identity(), "Device matches filter");
        ProbeOutcome::Matched(session)
    } else {
        let reason = format!("identity {} does not match {}", session.identity(), filter);
        debug!(port, %reason, "Rejecting device");
        session.close();
        ProbeOutcome::NoMatch {
            port: port.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Generation;
    use crate::port::{ConnectionParams, MockDevice, MockPorts};
    use serde_json::json;

    fn identity() -> Identity {
        Identity::new("stepper_controller", 5).with_form_factor("3x2")
    }

    #[test]
    fn test_unset_filter_accepts_everything() {
        assert!(IdentityFilter::any().matches(&identity()));
        assert!(IdentityFilter::any().matches(&Identity::default()));
    }

    #[test]
    fn test_set_fields_are_membership_tests() {
        let filter = IdentityFilter::any().serial_number(5).serial_number(6);
        assert!(filter.matches(&identity()));
        assert!(!IdentityFilter::any().serial_number(7).matches(&identity()));
        assert!(IdentityFilter::any()
            .name("stepper_controller")
            .form_factor("3x2")
            .matches(&identity()));
    }

    #[test]
    fn test_unreported_field_never_matches_a_set() {
        let unreported = Identity {
            serial_number: None,
            ..identity()
        };
        assert!(!IdentityFilter::any().serial_number(5).matches(&unreported));
        assert!(IdentityFilter::any().name("stepper_controller").matches(&unreported));
    }

    #[test]
    fn test_text_and_number_values_differ() {
        assert!(!IdentityFilter::any().serial_number("5").matches(&identity()));
    }

    #[test]
    fn test_filter_display() {
        let filter = IdentityFilter::any().name("a").serial_number(3);
        assert_eq!(filter.to_string(), "name in [a], serial_number in [3]");
        assert_eq!(IdentityFilter::any().to_string(), "any");
    }

    #[test]
    fn test_probe_rejection_releases_port() {
        let ports = MockPorts::new().with_device(
            "MOCK0",
            MockDevice::new(Generation::JsonRpc, json!({"name": "a", "serial_number": 1})),
        );
        let options = SessionOptions::default().with_params(ConnectionParams::immediate());
        let outcome = probe(&ports, "MOCK0", &options, &IdentityFilter::any().name("b"));
        assert!(matches!(outcome, ProbeOutcome::NoMatch { .. }));
        assert!(ports.opened_on("MOCK0")[0].is_closed());
    }
}
