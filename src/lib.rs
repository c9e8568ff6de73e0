//! # Offgrid Bridge - Off-grid metering for Victron Venus OS
//!
//! Publishes the inverter leg, a derived AC-coupled PV value, the generator
//! and two extra AC legs of an off-grid installation as Venus OS D-Bus
//! services, so the GX console and VRM portal show a complete energy
//! picture.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `readings`: Typed readings and the provider seam
//! - `sources`: Fixture, D-Bus, Modbus and fixed-value providers
//! - `modbus`: Modbus TCP client for AC meters
//! - `smoothing`: Exponential moving average
//! - `derivation`: PV-AC derivation, generator detection, state labels
//! - `accumulator`: Energy counters
//! - `gate`: Publication stability gate
//! - `persistence`: Counter persistence
//! - `sink`: Publication seam
//! - `dbus`: Venus OS D-Bus services
//! - `bridge`: Cycle orchestration

pub mod accumulator;
pub mod bridge;
pub mod config;
pub mod dbus;
pub mod derivation;
pub mod error;
pub mod gate;
pub mod logging;
pub mod modbus;
pub mod persistence;
pub mod readings;
pub mod sink;
pub mod smoothing;
pub mod sources;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use error::{BridgeError, Result};
