use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use zbus::object_server::SignalEmitter;
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Result as ZbusResult, names::WellKnownName};

use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};

use super::items::BusItem;
use super::lock_shared;
use super::root::{RootBus, TreeNode};
use super::shared::DbusSharedState;

/// One exported Venus service: its own connection, name and path tree
pub struct DbusService {
    logger: StructuredLogger,
    service_name: String,
    connection: Option<Connection>,
    pub(crate) shared: Arc<Mutex<DbusSharedState>>,
    registered_paths: HashSet<String>,
    root_path: OwnedObjectPath,
}

impl DbusService {
    pub fn new(service_name: &str) -> Result<Self> {
        let logger = get_logger_with_context(
            LogContext::new("dbus").with_field("service", service_name.to_string()),
        );
        let root_path = OwnedObjectPath::try_from("/")
            .map_err(|e| BridgeError::dbus(format!("Invalid object path: {}", e)))?;
        Ok(Self {
            logger,
            service_name: service_name.to_string(),
            connection: None,
            shared: Arc::new(Mutex::new(DbusSharedState::new())),
            registered_paths: HashSet::new(),
            root_path,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Current value of a path
    pub fn value(&self, path: &str) -> Option<serde_json::Value> {
        lock_shared(&self.shared).get(path).cloned()
    }

    /// Connect, export the root object and claim the service name.
    ///
    /// Paths added before `start` are exported here as well.
    pub async fn start(&mut self) -> Result<()> {
        let connection = super::connect_bus().await?;

        let root = RootBus {
            shared: Arc::clone(&self.shared),
        };
        connection
            .object_server()
            .at(&self.root_path, root)
            .await
            .map_err(|e| BridgeError::dbus(format!("Register root BusItem failed: {}", e)))?;

        self.connection = Some(connection.clone());

        // Export the objects of paths that were seeded offline
        let pending: Vec<String> = lock_shared(&self.shared).paths.keys().cloned().collect();
        self.registered_paths.clear();
        for path in pending {
            self.register_objects(&path).await?;
        }

        // Claim the name last so clients never see a half-populated service
        self.request_name(&connection)
            .await
            .map_err(|e| BridgeError::dbus(format!("RequestName failed: {}", e)))?;
        self.logger
            .info(&format!("D-Bus service started: {}", self.service_name));
        Ok(())
    }

    /// Release the service name and drop the connection
    pub async fn stop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        self.logger.info("Stopping D-Bus service");
        if let Ok(name) = WellKnownName::try_from(self.service_name.as_str())
            && let Ok(proxy) = zbus::fdo::DBusProxy::new(&connection).await
        {
            let _ = proxy.release_name(name).await;
        }
        self.registered_paths.clear();
    }

    /// Add a path if it does not exist yet, exporting its objects
    pub async fn ensure_item(&mut self, path: &str, initial_value: serde_json::Value) -> Result<()> {
        self.register_objects(path).await?;
        let mut shared = lock_shared(&self.shared);
        if !shared.paths.contains_key(path) {
            shared.paths.insert(path.to_string(), initial_value);
        }
        Ok(())
    }

    async fn register_objects(&mut self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for i in 1..=segments.len() {
            let subpath = format!("/{}", segments[..i].join("/"));
            if self.registered_paths.contains(&subpath) {
                continue;
            }
            let Some(conn) = &self.connection else {
                // Exported on start()
                continue;
            };
            let obj_path = OwnedObjectPath::try_from(subpath.as_str()).map_err(|e| {
                BridgeError::dbus(format!("Invalid object path '{}': {}", subpath, e))
            })?;
            let registered = if i == segments.len() {
                let item = BusItem::new(subpath.clone(), Arc::clone(&self.shared));
                conn.object_server().at(&obj_path, item).await
            } else {
                let node = TreeNode::new(subpath.clone(), Arc::clone(&self.shared));
                conn.object_server().at(&obj_path, node).await
            };
            registered.map_err(|e| {
                BridgeError::dbus(format!("Register object failed for {}: {}", subpath, e))
            })?;
            self.registered_paths.insert(subpath);
        }
        Ok(())
    }

    /// Set several paths, emitting one `ItemsChanged` for the batch.
    /// Returns the number of paths whose value changed.
    pub async fn update_paths(
        &mut self,
        updates: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<usize> {
        let mut changed: Vec<(String, serde_json::Value)> = Vec::new();
        for (path, value) in updates {
            let unchanged = lock_shared(&self.shared).get(&path) == Some(&value);
            if unchanged {
                continue;
            }
            self.ensure_item(&path, value.clone()).await?;
            lock_shared(&self.shared)
                .paths
                .insert(path.clone(), value.clone());
            changed.push((path, value));
        }
        if !changed.is_empty() {
            self.emit_changes(&changed).await?;
        }
        Ok(changed.len())
    }

    /// Set one path. Returns whether the value changed.
    pub async fn update_path(&mut self, path: &str, value: serde_json::Value) -> Result<bool> {
        Ok(self.update_paths([(path.to_string(), value)]).await? > 0)
    }

    async fn emit_changes(&self, changed: &[(String, serde_json::Value)]) -> Result<()> {
        let Some(conn) = &self.connection else {
            return Ok(());
        };
        for (path, value) in changed {
            let obj_path = OwnedObjectPath::try_from(path.as_str()).map_err(|e| {
                BridgeError::dbus(format!("Invalid object path '{}': {}", path, e))
            })?;
            let item_ctx = SignalEmitter::new(conn, obj_path)
                .map_err(|e| BridgeError::dbus(format!("SignalEmitter new failed: {}", e)))?;
            let _ = BusItem::properties_changed(&item_ctx, BusItem::change_entry(path, value)).await;
        }

        let root_ctx = SignalEmitter::new(conn, self.root_path.clone())
            .map_err(|e| BridgeError::dbus(format!("Root SignalEmitter failed: {}", e)))?;
        let entries: Vec<(&str, _)> = changed
            .iter()
            .map(|(path, value)| (path.as_str(), BusItem::change_entry(path, value)))
            .collect();
        let outer: HashMap<&str, HashMap<&str, zbus::zvariant::OwnedValue>> =
            entries.into_iter().collect();
        let _ = RootBus::items_changed(&root_ctx, outer).await;
        Ok(())
    }

    async fn request_name(&self, connection: &Connection) -> ZbusResult<()> {
        use zbus::fdo::{DBusProxy, RequestNameFlags};
        let proxy = DBusProxy::new(connection).await?;
        let name = WellKnownName::try_from(self.service_name.as_str())?;
        let _ = proxy
            .request_name(name, RequestNameFlags::ReplaceExisting.into())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_updates_track_values() {
        let mut svc = DbusService::new("com.victronenergy.pvinverter.test").unwrap();
        svc.ensure_item("/Position", serde_json::json!(1)).await.unwrap();
        // ensure_item does not overwrite an existing value
        svc.ensure_item("/Position", serde_json::json!(0)).await.unwrap();
        assert_eq!(svc.value("/Position"), Some(serde_json::json!(1)));

        assert!(svc.update_path("/Ac/Power", serde_json::json!(680.0)).await.unwrap());
        assert!(!svc.update_path("/Ac/Power", serde_json::json!(680.0)).await.unwrap());

        let n = svc
            .update_paths([
                ("/Ac/Power".to_string(), serde_json::json!(680.0)),
                ("/Ac/L1/Power".to_string(), serde_json::json!(680.0)),
            ])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(!svc.is_connected());
    }
}
