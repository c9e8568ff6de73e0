use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Value};

use super::lock_shared;
use super::shared::DbusSharedState;
use super::util::{format_text_for_path, text_owned_value};

/// Venus-style leaf item implementing `com.victronenergy.BusItem`.
///
/// Every published path is produced by the bridge, so writes from other
/// processes are refused.
pub struct BusItem {
    pub(crate) path: String,
    pub(crate) shared: Arc<Mutex<DbusSharedState>>,
}

impl BusItem {
    pub fn new(path: String, shared: Arc<Mutex<DbusSharedState>>) -> Self {
        Self { path, shared }
    }

    fn current(&self) -> serde_json::Value {
        lock_shared(&self.shared)
            .get(&self.path)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    /// `{"Value": v, "Text": t}` as carried by the change signals
    pub(crate) fn change_entry(path: &str, value: &serde_json::Value) -> HashMap<&'static str, OwnedValue> {
        let mut entry: HashMap<&'static str, OwnedValue> = HashMap::new();
        entry.insert("Value", Self::serde_to_owned_value(value));
        entry.insert("Text", text_owned_value(&format_text_for_path(path, value)));
        entry
    }

    pub(crate) fn serde_to_owned_value(v: &serde_json::Value) -> OwnedValue {
        match v {
            // Venus publishes "invalid" as an empty array
            serde_json::Value::Null => OwnedValue::try_from(Value::from(Vec::<i32>::new()))
                .unwrap_or_else(|_| OwnedValue::from(0i64)),
            serde_json::Value::Bool(b) => OwnedValue::from(i32::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    OwnedValue::from(i)
                } else if let Some(u) = n.as_u64() {
                    OwnedValue::from(u)
                } else {
                    OwnedValue::from(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => text_owned_value(s),
            _ => OwnedValue::from(0i64),
        }
    }

    pub(crate) fn owned_value_to_serde(v: &OwnedValue) -> serde_json::Value {
        if let Ok(b) = <bool as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(b);
        }
        if let Ok(i) = <i32 as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(i);
        }
        if let Ok(i) = <i64 as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(i);
        }
        if let Ok(u) = <u32 as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(u);
        }
        if let Ok(u) = <u64 as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(u);
        }
        if let Ok(f) = <f64 as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(f);
        }
        if let Ok(s) = <&str as TryFrom<&OwnedValue>>::try_from(v) {
            return serde_json::json!(s.to_string());
        }
        serde_json::Value::Null
    }
}

#[zbus::interface(name = "com.victronenergy.BusItem")]
impl BusItem {
    #[zbus(name = "GetValue")]
    async fn get_value(&self) -> OwnedValue {
        Self::serde_to_owned_value(&self.current())
    }

    #[zbus(name = "SetValue")]
    async fn set_value(&self, _value: OwnedValue) -> i32 {
        // Read-only item
        1
    }

    #[zbus(name = "GetText")]
    async fn get_text(&self) -> String {
        format_text_for_path(&self.path, &self.current())
    }

    #[zbus(signal)]
    pub async fn properties_changed(
        ctxt: &SignalEmitter<'_>,
        changes: HashMap<&str, OwnedValue>,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(path: &str, value: serde_json::Value) -> BusItem {
        let shared = Arc::new(Mutex::new(DbusSharedState::new()));
        shared.lock().unwrap().paths.insert(path.to_string(), value);
        BusItem::new(path.to_string(), shared)
    }

    #[test]
    fn owned_value_conversions() {
        let ov_i = BusItem::serde_to_owned_value(&serde_json::json!(-5));
        assert_eq!(BusItem::owned_value_to_serde(&ov_i), serde_json::json!(-5));

        let ov_f = BusItem::serde_to_owned_value(&serde_json::json!(680.5));
        assert_eq!(BusItem::owned_value_to_serde(&ov_f), serde_json::json!(680.5));

        let ov_s = BusItem::serde_to_owned_value(&serde_json::json!("AC-PV (Outback L1)"));
        assert_eq!(
            BusItem::owned_value_to_serde(&ov_s),
            serde_json::json!("AC-PV (Outback L1)")
        );

        // Booleans travel as integers the way Venus expects
        let ov_b = BusItem::serde_to_owned_value(&serde_json::json!(true));
        assert_eq!(BusItem::owned_value_to_serde(&ov_b), serde_json::json!(1));
    }

    #[tokio::test]
    async fn items_are_read_only() {
        let item = make_item("/Ac/L1/Power", serde_json::json!(500.0));
        assert_eq!(item.set_value(OwnedValue::from(0i64)).await, 1);
        assert_eq!(item.current(), serde_json::json!(500.0));
        assert_eq!(item.get_text().await, "500W");
    }

    #[test]
    fn change_entry_carries_value_and_text() {
        let entry = BusItem::change_entry("/Ac/Power", &serde_json::json!(12.0));
        assert!(entry.contains_key("Value"));
        assert!(entry.contains_key("Text"));
    }
}
