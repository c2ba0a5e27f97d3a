//! Call-name / wire-name conversion.
//!
//! Firmware names its methods in lower camel case (`setLedOn`); the host
//! calls them in snake case (`set_led_on`).

/// Converts between the names callers use and the names on the wire.
///
/// The two conversions must be inverses for every wire name the device
/// reports, otherwise a method could be listed but not invoked.
pub trait Naming: Send + Sync + std::fmt::Debug {
    fn to_call_name(&self, wire_name: &str) -> String;
    fn to_wire_name(&self, call_name: &str) -> String;
}

/// `getDeviceId` ↔ `get_device_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseNaming;

impl Naming for SnakeCaseNaming {
    fn to_call_name(&self, wire_name: &str) -> String {
        let mut out = String::with_capacity(wire_name.len() + 4);
        let chars: Vec<char> = wire_name.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            if c == '-' {
                out.push('_');
                continue;
            }
            if c.is_uppercase() {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                let boundary = match prev {
                    Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                    Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                    _ => false,
                };
                if boundary && !out.ends_with('_') {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    fn to_wire_name(&self, call_name: &str) -> String {
        let mut out = String::with_capacity(call_name.len());
        let mut upper_next = false;
        for c in call_name.chars() {
            if c == '_' && !out.is_empty() {
                upper_next = true;
            } else if upper_next {
                out.extend(c.to_uppercase());
                upper_next = false;
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Uses wire names unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimNaming;

impl Naming for VerbatimNaming {
    fn to_call_name(&self, wire_name: &str) -> String {
        wire_name.to_string()
    }

    fn to_wire_name(&self, call_name: &str) -> String {
        call_name.to_string()
    }
}
