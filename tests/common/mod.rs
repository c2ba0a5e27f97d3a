//! Shared test utilities for remote device tests.
//!
//! Builders for scripted mock devices and for sessions/discovery passes
//! that run without any settle or write delay.

#![allow(dead_code)]

use remote_device::codec::Generation;
use remote_device::port::{ConnectionParams, MockDevice, MockPorts};
use remote_device::{Discovery, PortScanner, SessionOptions};
use serde_json::{json, Value};

/// Session options with every delay set to zero.
pub fn immediate_options() -> SessionOptions {
    SessionOptions::default().with_params(ConnectionParams::immediate())
}

/// Discovery over `ports` that probes every listed port.
pub fn discovery(ports: &MockPorts) -> Discovery<'_> {
    Discovery::new(ports, immediate_options()).with_scanner(PortScanner::new().with_include(None))
}

/// A JSON-RPC LED controller.
///
/// `setLed` (id 3) declares `led, state`; `getLedCount` (id 4) returns 8;
/// `echo` (id 5) returns its arguments.
pub fn led_controller(serial_number: i64) -> MockDevice {
    MockDevice::new(
        Generation::JsonRpc,
        json!({
            "name": "led_controller",
            "form_factor": "5x3",
            "serial_number": serial_number,
            "firmware": "1.2.0"
        }),
    )
    .method_with_parameters("setLed", 3, &["led", "state"], |args| {
        Ok(Value::Array(args.to_vec()))
    })
    .method("getLedCount", 4, |_| Ok(json!(8)))
    .method("echo", 5, |args| Ok(Value::Array(args.to_vec())))
}

/// A status-code generation stepper board identified by model number.
///
/// `getPosition` (id 3) returns one field, `getStatus` (id 4) returns
/// flag fields with empty values, `move` (id 5) fails for negative steps,
/// `home` (id 6) answers with no payload at all.
pub fn stepper(model_number: i64, serial_number: i64) -> MockDevice {
    MockDevice::new(
        Generation::StatusCode,
        json!({"model_number": model_number, "serial_number": serial_number}),
    )
    .method("getPosition", 3, |_| Ok(json!({"position": 1200})))
    .method("getStatus", 4, |_| Ok(json!({"homed": "", "enabled": ""})))
    .method("move", 5, |args| match args.first().and_then(Value::as_i64) {
        Some(steps) if steps >= 0 => Ok(json!({"moved": steps, "position": 1200 + steps})),
        _ => Err("steps must be a non-negative integer".to_string()),
    })
    .method("home", 6, |_| Ok(Value::Null))
}
