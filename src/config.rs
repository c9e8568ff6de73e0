//! Configuration management for the bridge
//!
//! This module handles loading and validation of the application
//! configuration from YAML files. Every section carries defaults, so a
//! partial file (or no file at all) yields a runnable configuration.

use crate::error::{BridgeError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Environment variable that points at an explicit config file
pub const CONFIG_PATH_ENV: &str = "OFFGRID_BRIDGE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling period in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for a single channel read in milliseconds
    pub read_timeout_ms: u64,

    /// Cap for the elapsed time integrated in one cycle (seconds)
    pub max_elapsed_secs: f64,

    /// Consecutive invalid cycles before a published channel turns stale
    pub stale_threshold: u32,

    /// Timezone used to determine the calendar day for energy resets
    pub timezone: String,

    /// Path of the persisted accumulator record
    pub state_file: String,

    /// Log publications instead of exporting D-Bus services
    pub dry_run: bool,

    /// Fail startup if the D-Bus services cannot be registered
    pub require_dbus: bool,

    /// Log a loads-versus-sources balance line every cycle
    pub balance_check: bool,

    /// Period of the summary log line in seconds (0 disables)
    pub summary_period_secs: u64,

    /// Electrical topology inputs for the PV-AC derivation
    pub topology: TopologyConfig,

    /// Generator running detection
    pub generator: GeneratorConfig,

    /// Power smoothing
    pub smoothing: SmoothingConfig,

    /// Published D-Bus services
    pub services: ServicesConfig,

    /// Where each channel is read from
    pub sources: SourcesConfig,

    /// Deterministic fixture feed replacing all live sources
    pub testmode: TestModeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sign convention of the battery power reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatterySign {
    /// Positive while the battery discharges, negative while it charges
    DischargePositive,
    /// Positive while the battery charges (Victron `/Dc/Battery/Power`)
    ChargePositive,
}

/// What charges the battery when it absorbs power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSource {
    /// AC-coupled PV surplus flows into the battery through the inverter
    AcPv,
    /// A separate DC charge controller charges the battery
    DcMppt,
}

/// Electrical topology of the installation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub battery_sign: BatterySign,
    pub charge_source: ChargeSource,
    /// Generator power passes through the inverter leg while running
    pub generator_on_inverter_leg: bool,
}

/// Generator running detection (AND-logic with hysteresis)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Power at or above which the generator counts as running
    pub on_threshold_w: f64,
    /// Drop below `on_threshold_w - hysteresis_w` to stop
    pub hysteresis_w: f64,
    /// Minimum time the running state is held
    pub min_runtime_secs: f64,
    /// Only start when the inverter reports passthrough
    pub require_passthrough: bool,
}

/// Exponential moving average applied to every power channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Smoothing factor (0..1). Lower values smooth more; 0 disables.
    pub alpha: f64,
}

/// Names, instances and limits of the published services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Optional prefix prepended to every service name
    pub prefix: String,
    pub inverter_instance: u32,
    pub pvinverter_instance: u32,
    pub generator_instance: u32,
    pub l2_instance: u32,
    pub l3_instance: u32,
    pub l1_power_limit: u32,
    pub l2_power_limit: u32,
    pub l3_power_limit: u32,
    /// Voltage used to estimate currents from power
    pub nominal_voltage: f64,
}

/// Register width and word order of a Modbus power value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterEncoding {
    /// Signed 32-bit, low word first (Carlo Gavazzi ET112)
    I32LswFirst,
    /// Signed 32-bit, high word first
    I32,
    /// IEEE754 float, high word first
    F32,
    I16,
    U16,
}

/// Modbus register table a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    Holding,
    Input,
}

/// Modbus TCP register source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSourceConfig {
    pub ip: String,
    pub port: u16,
    pub unit_id: u8,
    pub register: u16,
    pub register_type: RegisterType,
    pub encoding: RegisterEncoding,
    /// Multiplier applied to the raw register value
    pub scale: f64,
}

/// Where a single channel is read from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Channel not installed; always unavailable
    None,
    /// Constant value
    Fixed { value: f64 },
    /// Value of a remote `com.victronenergy.BusItem`
    Dbus {
        service: String,
        path: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Modbus TCP register
    Modbus(ModbusSourceConfig),
}

fn default_scale() -> f64 {
    1.0
}

/// Per-channel sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub inverter_power: SourceConfig,
    pub battery_power: SourceConfig,
    pub generator_power: SourceConfig,
    pub ac_leg2_power: SourceConfig,
    pub ac_leg3_power: SourceConfig,
    pub inverter_mode: SourceConfig,
}

/// Fixture scenarios for the test mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Off,
    Night,
    Day,
    DayPlusBatt,
    DaySurplus,
    Gen,
    Custom,
}

/// Battery values for the test mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestBatteryConfig {
    pub voltage: f64,
    pub current: f64,
    /// Discharge-positive battery power
    pub power: f64,
    pub soc: f64,
    /// Use the values above instead of the automatic battery model
    pub override_values: bool,
}

/// Test mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestModeConfig {
    pub scenario: Scenario,
    pub l1_w: Option<f64>,
    pub l2_w: f64,
    pub l3_w: f64,
    pub pv_ac_w: Option<f64>,
    pub pv_dc_w: f64,
    pub generator_w: Option<f64>,
    pub battery: TestBatteryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Identical messages within this window are suppressed
    pub rate_limit_ms: u64,
}

impl TestModeConfig {
    pub fn enabled(&self) -> bool {
        self.scenario != Scenario::Off
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the environment override or default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            "offgrid_bridge.yaml",
            "/data/offgrid_bridge/config.yaml",
            "/etc/offgrid_bridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Self::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Resolve the configured timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            BridgeError::validation("timezone".to_string(), format!("{}: {}", self.timezone, e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.read_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "read_timeout_ms",
                "Must be greater than 0",
            ));
        }

        if !(self.max_elapsed_secs.is_finite() && self.max_elapsed_secs > 0.0) {
            return Err(BridgeError::validation(
                "max_elapsed_secs",
                "Must be positive",
            ));
        }

        if self.stale_threshold == 0 {
            return Err(BridgeError::validation(
                "stale_threshold",
                "Must be at least 1",
            ));
        }

        self.tz()?;

        if self.state_file.trim().is_empty() {
            return Err(BridgeError::validation("state_file", "Cannot be empty"));
        }

        if !(0.0..=1.0).contains(&self.smoothing.alpha) {
            return Err(BridgeError::validation(
                "smoothing.alpha",
                "Must be within 0..1",
            ));
        }

        if self.generator.hysteresis_w < 0.0
            || self.generator.hysteresis_w > self.generator.on_threshold_w
        {
            return Err(BridgeError::validation(
                "generator.hysteresis_w",
                "Must be between 0 and on_threshold_w",
            ));
        }

        if self.generator.min_runtime_secs < 0.0 {
            return Err(BridgeError::validation(
                "generator.min_runtime_secs",
                "Cannot be negative",
            ));
        }

        if self.services.nominal_voltage <= 0.0 {
            return Err(BridgeError::validation(
                "services.nominal_voltage",
                "Must be positive",
            ));
        }

        for (name, source) in self.sources.iter() {
            Self::validate_source(name, source)?;
        }

        Ok(())
    }

    fn validate_source(name: &str, source: &SourceConfig) -> Result<()> {
        match source {
            SourceConfig::None | SourceConfig::Fixed { .. } => Ok(()),
            SourceConfig::Dbus { service, path, .. } => {
                if service.is_empty() || !path.starts_with('/') {
                    return Err(BridgeError::validation(
                        format!("sources.{}", name),
                        "D-Bus source needs a service and an absolute path".to_string(),
                    ));
                }
                Ok(())
            }
            SourceConfig::Modbus(m) => {
                if m.ip.is_empty() {
                    return Err(BridgeError::validation(
                        format!("sources.{}.ip", name),
                        "IP address cannot be empty".to_string(),
                    ));
                }
                if m.port == 0 {
                    return Err(BridgeError::validation(
                        format!("sources.{}.port", name),
                        "Port must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl SourcesConfig {
    /// Iterate `(name, source)` pairs in channel order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SourceConfig)> {
        [
            ("inverter_power", &self.inverter_power),
            ("battery_power", &self.battery_power),
            ("generator_power", &self.generator_power),
            ("ac_leg2_power", &self.ac_leg2_power),
            ("ac_leg3_power", &self.ac_leg3_power),
            ("inverter_mode", &self.inverter_mode),
        ]
        .into_iter()
    }
}
