//! D-Bus integration for Venus OS
//!
//! Each published channel becomes its own Venus service: a connection that
//! owns a well-known name such as `com.victronenergy.pvinverter.outback_l1`
//! and exports its paths through the `com.victronenergy.BusItem` interface.
//! Reading values of other services (battery monitor, system) goes through
//! [`RemoteReader`].

use crate::error::{BridgeError, Result};
use crate::logging::get_logger;
use std::sync::{Arc, Mutex, MutexGuard};
use zbus::Connection;

mod items;
mod remote;
mod root;
mod service;
mod shared;
mod util;
mod venus;

pub use items::BusItem;
pub use remote::RemoteReader;
pub use root::{RootBus, TreeNode};
pub use service::DbusService;
pub use shared::DbusSharedState;
pub use venus::{ServiceLayout, VenusSink};

/// Lock the shared path table, recovering the data after a panic elsewhere
pub(crate) fn lock_shared(shared: &Arc<Mutex<DbusSharedState>>) -> MutexGuard<'_, DbusSharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connect to the system bus, falling back to the session bus
pub async fn connect_bus() -> Result<Connection> {
    match Connection::system().await {
        Ok(c) => Ok(c),
        Err(e_sys) => match Connection::session().await {
            Ok(c) => {
                get_logger("dbus").warn(&format!(
                    "System bus unavailable ({}); using session bus",
                    e_sys
                ));
                Ok(c)
            }
            Err(e_sess) => Err(BridgeError::dbus(format!(
                "DBus connect failed: system={} session={}",
                e_sys, e_sess
            ))),
        },
    }
}
