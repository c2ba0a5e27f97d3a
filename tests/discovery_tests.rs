//! Discovery over scripted mock ports.

mod common;

use common::{discovery, led_controller, stepper};
use pretty_assertions::assert_eq;
use remote_device::port::MockPorts;
use remote_device::{DeviceError, IdentityFilter, Lookup};

#[test]
fn test_no_devices_lists_tried_ports() {
    let ports = MockPorts::new()
        .with_unavailable("/dev/ttyACM0", "permission denied")
        .with_device("/dev/ttyACM1", led_controller(1).silent());

    let err = discovery(&ports)
        .find_one(None, &IdentityFilter::any())
        .unwrap_err();
    match err {
        DeviceError::DiscoveryNotFound { tried } => {
            assert_eq!(tried, vec!["/dev/ttyACM0", "/dev/ttyACM1"])
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(ports.opened().iter().all(|t| t.is_closed()));
}

#[test]
fn test_single_match_is_returned() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", led_controller(1))
        .with_unavailable("/dev/ttyACM1", "busy");

    let session = discovery(&ports)
        .find_one(None, &IdentityFilter::any())
        .unwrap();
    assert_eq!(session.port(), "/dev/ttyACM0");
    assert!(session.is_open());
}

#[test]
fn test_several_matches_are_ambiguous_and_closed() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", led_controller(1))
        .with_device("/dev/ttyACM1", led_controller(2));

    let err = discovery(&ports)
        .find_one(None, &IdentityFilter::any().name("led_controller"))
        .unwrap_err();
    match &err {
        DeviceError::DiscoveryAmbiguous { matches } => {
            let ports: Vec<&str> = matches.iter().map(|m| m.port.as_str()).collect();
            assert_eq!(ports, vec!["/dev/ttyACM0", "/dev/ttyACM1"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("serial_number=2"));
    assert!(ports.opened().iter().all(|t| t.is_closed()));
}

#[test]
fn test_filter_by_serial_number_only() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", led_controller(1))
        .with_device("/dev/ttyACM1", led_controller(2))
        .with_device("/dev/ttyACM2", stepper(1130, 2));

    let report = discovery(&ports)
        .discover(None, &IdentityFilter::any().serial_number(2))
        .unwrap();
    let found: Vec<&str> = report.sessions.iter().map(|s| s.port()).collect();
    assert_eq!(found, vec!["/dev/ttyACM1", "/dev/ttyACM2"]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].port, "/dev/ttyACM0");
    assert!(ports.opened_on("/dev/ttyACM0")[0].is_closed());
}

#[test]
fn test_filter_with_several_accepted_values() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", led_controller(1))
        .with_device("/dev/ttyACM1", led_controller(2))
        .with_device("/dev/ttyACM2", led_controller(3));

    let filter = IdentityFilter::any().serial_number(1).serial_number(3);
    let report = discovery(&ports).discover(None, &filter).unwrap();
    assert_eq!(report.sessions.len(), 2);
}

#[test]
fn test_unreported_field_is_rejected_by_a_set_filter() {
    // Steppers report a model number but no form factor
    let ports = MockPorts::new().with_device("/dev/ttyACM0", stepper(1130, 5));

    let filter = IdentityFilter::any().form_factor("5x3");
    assert!(matches!(
        discovery(&ports).find_one(None, &filter),
        Err(DeviceError::DiscoveryNotFound { .. })
    ));
    assert!(discovery(&ports)
        .find_one(None, &IdentityFilter::any().name(1130))
        .is_ok());
}

#[test]
fn test_explicit_ports_skip_enumeration() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", led_controller(1))
        .with_device("/dev/ttyACM1", led_controller(2));

    let explicit = vec!["/dev/ttyACM1".to_string(), "/dev/ttyUSB9".to_string()];
    let report = discovery(&ports)
        .discover(Some(&explicit), &IdentityFilter::any())
        .unwrap();
    assert_eq!(report.tried, explicit);
    assert_eq!(report.sessions.len(), 1);
    assert!(ports.opened_on("/dev/ttyACM0").is_empty());
}

#[test]
fn test_mixed_generations_in_one_pass() {
    let ports = MockPorts::new()
        .with_device("/dev/ttyACM0", stepper(1130, 7))
        .with_device("/dev/ttyACM1", led_controller(4));

    let mut registry = discovery(&ports)
        .discover(None, &IdentityFilter::any())
        .unwrap()
        .into_registry()
        .unwrap();
    assert_eq!(registry.len(), 2);

    // Numbers sort before text, so the stepper comes first
    assert_eq!(registry.ports(), vec!["/dev/ttyACM0", "/dev/ttyACM1"]);

    match registry.get_by_name("led_controller") {
        Lookup::One(session) => assert_eq!(session.port(), "/dev/ttyACM1"),
        other => panic!("unexpected lookup: {other:?}"),
    }

    let stepper = registry.get_by_port_mut("/dev/ttyACM0").unwrap();
    assert_eq!(stepper.invoke("get_position", ()).unwrap(), serde_json::json!(1200));

    registry.close_all();
    assert!(ports.opened().iter().all(|t| t.is_closed()));
}
