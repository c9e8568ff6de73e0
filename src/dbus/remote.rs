use std::time::Duration;
use zbus::Connection;

use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};

use super::items::BusItem;

/// Reads `GetValue` of items exported by other Venus services
pub struct RemoteReader {
    connection: Option<Connection>,
    call_timeout: Duration,
    logger: StructuredLogger,
}

impl RemoteReader {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            connection: None,
            call_timeout,
            logger: get_logger("dbus_remote"),
        }
    }

    async fn connection(&mut self) -> Result<Connection> {
        if let Some(conn) = &self.connection {
            return Ok(conn.clone());
        }
        let conn = super::connect_bus().await?;
        self.logger.debug("Connected to D-Bus for remote reads");
        self.connection = Some(conn.clone());
        Ok(conn)
    }

    /// Value of `path` on `service_name`
    pub async fn read_value(&mut self, service_name: &str, path: &str) -> Result<serde_json::Value> {
        let conn = self.connection().await?;
        let proxy = tokio::time::timeout(
            self.call_timeout,
            zbus::Proxy::new(&conn, service_name, path, "com.victronenergy.BusItem"),
        )
        .await
        .map_err(|_| BridgeError::timeout("DBus proxy creation timed out"))?
        .map_err(|e| BridgeError::dbus(format!("Proxy creation failed: {}", e)))?;

        let val: zbus::zvariant::OwnedValue =
            tokio::time::timeout(self.call_timeout, proxy.call("GetValue", &()))
                .await
                .map_err(|_| BridgeError::timeout("DBus GetValue timed out"))?
                .map_err(|e| {
                    BridgeError::dbus(format!("GetValue {}{} failed: {}", service_name, path, e))
                })?;

        Ok(BusItem::owned_value_to_serde(&val))
    }

    /// Numeric value of `path`; invalid (empty) items are an error
    pub async fn read_f64(&mut self, service_name: &str, path: &str) -> Result<f64> {
        let value = self.read_value(service_name, path).await?;
        value.as_f64().filter(|v| v.is_finite()).ok_or_else(|| {
            BridgeError::reading(format!("{}{} has no numeric value", service_name, path))
        })
    }
}
