use offgrid_bridge::config::RegisterEncoding;
use offgrid_bridge::modbus::{ModbusClient, decode_32bit_float, decode_value, register_count};

#[test]
fn decode_32bit_float_insufficient_registers() {
    let regs = [0x3F80u16];
    assert!(decode_32bit_float(&regs).is_err());
}

#[test]
fn et112_power_scaled_to_watts() {
    // 465.3 W reported as 4653 (W * 10), low word first
    let raw = decode_value(&[4653, 0], RegisterEncoding::I32LswFirst).unwrap();
    assert!((raw * 0.1 - 465.3).abs() < 1e-9);
}

#[test]
fn register_counts() {
    assert_eq!(register_count(RegisterEncoding::I32LswFirst), 2);
    assert_eq!(register_count(RegisterEncoding::F32), 2);
    assert_eq!(register_count(RegisterEncoding::U16), 1);
}

#[test]
fn float_registers() {
    // 2.5f32 -> 0x40200000
    let v = decode_value(&[0x4020, 0x0000], RegisterEncoding::F32).unwrap();
    assert_eq!(v, 2.5);
}

#[tokio::test]
async fn read_without_connection_fails() {
    let mut client = ModbusClient::new("127.0.0.1", 502);
    let r = client
        .read_registers(1, offgrid_bridge::config::RegisterType::Input, 4, 2)
        .await;
    assert!(r.is_err());
}
