use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zbus::object_server::SignalEmitter;
use zbus::zvariant::OwnedValue;

use super::items::BusItem;
use super::lock_shared;
use super::shared::DbusSharedState;
use super::util::{format_text_for_path, text_owned_value};

fn subtree_map(
    shared: &Arc<Mutex<DbusSharedState>>,
    prefix: &str,
    as_text: bool,
) -> HashMap<String, OwnedValue> {
    let entries = lock_shared(shared).subtree(prefix);
    let mut px = prefix.to_string();
    if !px.ends_with('/') {
        px.push('/');
    }
    entries
        .into_iter()
        .map(|(suffix, val)| {
            let ov = if as_text {
                text_owned_value(&format_text_for_path(&format!("{}{}", px, suffix), &val))
            } else {
                BusItem::serde_to_owned_value(&val)
            };
            (suffix, ov)
        })
        .collect()
}

/// Root object of a service: whole-tree reads and `ItemsChanged`
pub struct RootBus {
    pub(crate) shared: Arc<Mutex<DbusSharedState>>,
}

#[zbus::interface(name = "com.victronenergy.BusItem")]
impl RootBus {
    #[zbus(name = "GetValue")]
    async fn get_value(&self) -> OwnedValue {
        OwnedValue::from(subtree_map(&self.shared, "/", false))
    }

    #[zbus(name = "GetText")]
    async fn get_text(&self) -> OwnedValue {
        OwnedValue::from(subtree_map(&self.shared, "/", true))
    }

    #[zbus(name = "GetItems")]
    async fn get_items(&self) -> HashMap<String, HashMap<String, OwnedValue>> {
        let paths: Vec<(String, serde_json::Value)> = lock_shared(&self.shared)
            .paths
            .iter()
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect();
        paths
            .into_iter()
            .map(|(path, val)| {
                let entry = BusItem::change_entry(&path, &val)
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect();
                (path, entry)
            })
            .collect()
    }

    #[zbus(signal)]
    pub async fn items_changed(
        ctxt: &SignalEmitter<'_>,
        changes: HashMap<&str, HashMap<&str, OwnedValue>>,
    ) -> zbus::Result<()>;
}

/// Intermediate node (e.g. `/Ac/L1`) answering with its subtree
pub struct TreeNode {
    pub(crate) path: String,
    pub(crate) shared: Arc<Mutex<DbusSharedState>>,
}

impl TreeNode {
    pub fn new(path: String, shared: Arc<Mutex<DbusSharedState>>) -> Self {
        Self { path, shared }
    }
}

#[zbus::interface(name = "com.victronenergy.BusItem")]
impl TreeNode {
    #[zbus(name = "GetValue")]
    async fn get_value(&self) -> OwnedValue {
        OwnedValue::from(subtree_map(&self.shared, &self.path, false))
    }

    #[zbus(name = "GetText")]
    async fn get_text(&self) -> OwnedValue {
        OwnedValue::from(subtree_map(&self.shared, &self.path, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tree_node_returns_relative_paths() {
        let shared = Arc::new(Mutex::new(DbusSharedState::new()));
        {
            let mut s = shared.lock().unwrap();
            s.paths.insert("/Ac/Out/L2/Power".to_string(), serde_json::json!(120.0));
            s.paths.insert("/Ac/Out/L2/Voltage".to_string(), serde_json::json!(230.0));
            s.paths.insert("/DeviceInstance".to_string(), serde_json::json!(48));
        }
        let map = subtree_map(&shared, "/Ac/Out/L2", false);
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("Power"));

        let root = RootBus { shared };
        let items = root.get_items().await;
        assert_eq!(items.len(), 3);
        assert!(items["/DeviceInstance"].contains_key("Text"));
    }
}
