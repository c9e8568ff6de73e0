use zbus::zvariant::{OwnedValue, Value};

/// Human readable text for a path, with the unit Venus shows for it
pub(crate) fn format_text_for_path(path: &str, val: &serde_json::Value) -> String {
    let Some(f) = val.as_f64().filter(|_| !val.is_boolean()) else {
        return format_text_value(val);
    };
    let unit = if path.ends_with("/Power") || path.ends_with("/PowerLimit") {
        "W"
    } else if path.ends_with("/Voltage") {
        "V"
    } else if path.ends_with("/Current") {
        "A"
    } else if path.contains("/Energy/") {
        "kWh"
    } else {
        return format_text_value(val);
    };
    let decimals = if unit == "kWh" || unit == "A" { 2 } else { 0 };
    format!("{:.*}{}", decimals, f, unit)
}

pub(crate) fn format_text_value(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Number(n) => {
            if n.is_f64() {
                n.as_f64()
                    .map(|f| format!("{:.2}", f))
                    .unwrap_or_else(|| n.to_string())
            } else {
                n.to_string()
            }
        }
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => val.to_string(),
    }
}

pub(crate) fn text_owned_value(text: &str) -> OwnedValue {
    OwnedValue::try_from(Value::from(text)).unwrap_or_else(|_| OwnedValue::from(0i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_follow_path() {
        assert_eq!(format_text_for_path("/Ac/L1/Power", &serde_json::json!(680.4)), "680W");
        assert_eq!(format_text_for_path("/Ac/Out/L1/Current", &serde_json::json!(2.956)), "2.96A");
        assert_eq!(format_text_for_path("/Ac/Energy/Forward", &serde_json::json!(1.5)), "1.50kWh");
        assert_eq!(format_text_for_path("/DeviceInstance", &serde_json::json!(28)), "28");
        assert_eq!(format_text_for_path("/ProductName", &serde_json::json!("ET112 (L2)")), "ET112 (L2)");
    }

    #[test]
    fn integers_have_no_decimals() {
        assert_eq!(format_text_value(&serde_json::json!(3)), "3");
        assert_eq!(format_text_value(&serde_json::json!(0.5)), "0.50");
    }
}
