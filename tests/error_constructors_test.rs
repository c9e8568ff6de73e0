use offgrid_bridge::error::BridgeError;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(
        BridgeError::config("x"),
        BridgeError::Config { .. }
    ));
    assert!(matches!(
        BridgeError::modbus("x"),
        BridgeError::Modbus { .. }
    ));
    assert!(matches!(BridgeError::dbus("x"), BridgeError::DBus { .. }));
    assert!(matches!(
        BridgeError::reading("x"),
        BridgeError::Reading { .. }
    ));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(BridgeError::io("x"), BridgeError::Io { .. }));
    assert!(matches!(
        BridgeError::validation("f", "m"),
        BridgeError::Validation { .. }
    ));
    assert!(matches!(
        BridgeError::timeout("x"),
        BridgeError::Timeout { .. }
    ));
    assert!(matches!(
        BridgeError::generic("x"),
        BridgeError::Generic { .. }
    ));
}

#[test]
fn conversions() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert!(matches!(BridgeError::from(io), BridgeError::Io { .. }));

    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(
        BridgeError::from(json),
        BridgeError::Serialization { .. }
    ));
}

#[test]
fn display_messages() {
    let e = BridgeError::validation("field", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));
    assert!(s.contains("field"));
}
