//! PV-AC derivation, generator detection and state classification
//!
//! The inverter leg L1 carries everything the inverter outputs: PV that is
//! AC-coupled into it, battery discharge and, while passing through,
//! generator power. The PV figure is what remains of L1 once the other
//! contributors are taken out, so PV energy is never counted twice.

use crate::config::{BatterySign, ChargeSource, GeneratorConfig, TopologyConfig};
use crate::readings::{INVERTER_MODE_PASSTHROUGH, Reading};
use serde::Serialize;
use std::fmt;

/// Hysteresis band used by [`classify_state`]
pub const STATE_EPSILON_W: f64 = 50.0;

/// Result of a derivation: a non-negative value or nothing at all
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivedValue {
    Available(f64),
    Unavailable,
}

impl DerivedValue {
    /// Available if the value is finite; negatives are floored at zero
    pub fn from_watts(watts: Option<f64>) -> Self {
        match watts {
            Some(w) if w.is_finite() => Self::Available(w.max(0.0)),
            _ => Self::Unavailable,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Available(w) => Some(*w),
            Self::Unavailable => None,
        }
    }
}

/// Computes PV-AC power from the inverter leg and the battery flow
#[derive(Debug, Clone)]
pub struct PvAcDerivation {
    battery_sign: BatterySign,
    charge_source: ChargeSource,
}

impl PvAcDerivation {
    pub fn new(topology: &TopologyConfig) -> Self {
        Self {
            battery_sign: topology.battery_sign,
            charge_source: topology.charge_source,
        }
    }

    /// Battery power normalised to discharge-positive
    pub fn discharge_positive(&self, battery_w: f64) -> f64 {
        match self.battery_sign {
            BatterySign::DischargePositive => battery_w,
            BatterySign::ChargePositive => -battery_w,
        }
    }

    /// Derive PV-AC power.
    ///
    /// `generator_on_leg_w` is the generator power currently flowing through
    /// the inverter leg (zero unless the generator is running).
    pub fn derive(
        &self,
        inverter: &Reading,
        battery: &Reading,
        generator_on_leg_w: f64,
    ) -> DerivedValue {
        let (Some(l1), Some(batt)) = (inverter.value(), battery.value()) else {
            return DerivedValue::Unavailable;
        };

        let l1 = l1.max(0.0);
        let batt = self.discharge_positive(batt);
        let discharge = batt.max(0.0);
        let charge = (-batt).max(0.0);
        let generator = if generator_on_leg_w.is_finite() {
            generator_on_leg_w.max(0.0)
        } else {
            0.0
        };

        let pv = match self.charge_source {
            ChargeSource::AcPv => (l1 + charge - discharge - generator).clamp(0.0, l1 + charge),
            ChargeSource::DcMppt => (l1 - discharge - generator).clamp(0.0, l1),
        };
        DerivedValue::from_watts(Some(pv))
    }
}

/// Generator running detection with hysteresis and minimum runtime
#[derive(Debug, Clone)]
pub struct GeneratorDetector {
    config: GeneratorConfig,
    running: bool,
    running_secs: f64,
}

impl GeneratorDetector {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            config: config.clone(),
            running: false,
            running_secs: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Feed one cycle. `power` is the smoothed generator power, `mode` the
    /// inverter state; `None` means the channel was unreadable. An unknown
    /// mode does not block detection. An unknown power holds the state.
    pub fn update(&mut self, power: Option<f64>, mode: Option<f64>, elapsed_secs: f64) -> bool {
        if self.running && elapsed_secs.is_finite() && elapsed_secs > 0.0 {
            self.running_secs += elapsed_secs;
        }
        let Some(power) = power.filter(|p| p.is_finite()) else {
            return self.running;
        };

        let passthrough = !self.config.require_passthrough
            || mode.is_none_or(|m| (m - INVERTER_MODE_PASSTHROUGH).abs() < 0.5);
        let off_threshold = self.config.on_threshold_w - self.config.hysteresis_w;

        if !self.running {
            if passthrough && power >= self.config.on_threshold_w {
                self.running = true;
                self.running_secs = 0.0;
            }
        } else if power <= off_threshold && self.running_secs >= self.config.min_runtime_secs {
            self.running = false;
            self.running_secs = 0.0;
        }
        self.running
    }
}

/// Operating state of the installation in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    GenPassthrough,
    NightBattery,
    DayPvDirect,
    DayPvSurplus,
    DayPvPlusBattery,
    Unknown,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::GenPassthrough => "GEN_PASSTHROUGH",
            SystemState::NightBattery => "NIGHT_BATT",
            SystemState::DayPvDirect => "DAY_PV_DIRECT",
            SystemState::DayPvSurplus => "DAY_PV_SURPLUS",
            SystemState::DayPvPlusBattery => "DAY_PV_PLUS_BATT",
            SystemState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Label a cycle. `battery_w` is discharge-positive.
pub fn classify_state(
    pv_ac: f64,
    l1: f64,
    battery_w: f64,
    mode: Option<f64>,
    generator_w: f64,
) -> SystemState {
    let eps = STATE_EPSILON_W;
    let passthrough = mode.is_some_and(|m| (m - INVERTER_MODE_PASSTHROUGH).abs() < 0.5);
    if passthrough && generator_w > eps {
        return SystemState::GenPassthrough;
    }
    if pv_ac <= eps && l1 > eps {
        return SystemState::NightBattery;
    }

    let diff = pv_ac - l1;
    if battery_w.abs() <= eps && diff.abs() <= eps {
        return SystemState::DayPvDirect;
    }
    if diff >= eps {
        return SystemState::DayPvSurplus;
    }
    if diff <= -eps && battery_w > eps {
        return SystemState::DayPvPlusBattery;
    }
    if pv_ac > eps {
        SystemState::DayPvDirect
    } else {
        SystemState::NightBattery
    }
}
