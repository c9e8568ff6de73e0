use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::derivation::SystemState;
use crate::gate::PublicationState;
use crate::readings::Channel;
use crate::sink::OutputChannel;

/// Lifecycle of the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeState {
    Initializing,
    Running,
    ShuttingDown,
}

/// Everything one cycle read, derived and published
#[derive(Debug, Clone, Serialize)]
pub struct CycleSnapshot {
    pub timestamp: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// Raw readings; `None` for channels that could not be read
    pub inputs: BTreeMap<Channel, Option<f64>>,
    pub l1_w: Option<f64>,
    pub pv_ac_w: Option<f64>,
    pub generator_w: Option<f64>,
    pub generator_running: bool,
    pub l2_w: Option<f64>,
    pub l3_w: Option<f64>,
    /// Discharge-positive battery power
    pub battery_w: Option<f64>,
    pub system_state: SystemState,
    pub pv_energy_wh: f64,
    pub l2_energy_wh: f64,
    pub l3_energy_wh: f64,
    pub publications: BTreeMap<OutputChannel, PublicationState>,
    pub sink_errors: u32,
    pub persisted: bool,
}

fn watts(v: Option<f64>) -> String {
    v.map(|w| format!("{}", w.round() as i64))
        .unwrap_or_else(|| "-".to_string())
}

impl CycleSnapshot {
    pub fn input(&self, channel: Channel) -> Option<f64> {
        self.inputs.get(&channel).copied().flatten()
    }

    pub fn publication(&self, channel: OutputChannel) -> PublicationState {
        self.publications
            .get(&channel)
            .copied()
            .unwrap_or(PublicationState::Unregistered)
    }

    /// One-line overview for the periodic summary log
    pub fn summary_line(&self) -> String {
        let generator = if self.generator_running {
            self.generator_w
        } else {
            Some(0.0)
        };
        format!(
            "L1={} L2={} L3={} | PV_ac={} | GEN={} | BATT={} | state={} | E_pv={:.3}kWh",
            watts(self.l1_w),
            watts(self.l2_w),
            watts(self.l3_w),
            watts(self.pv_ac_w),
            watts(generator),
            watts(self.battery_w),
            self.system_state,
            self.pv_energy_wh / 1000.0
        )
    }

    /// `loads - sources` when every term is known
    pub fn balance_w(&self) -> Option<f64> {
        let loads = self.l1_w? + self.l2_w.unwrap_or(0.0) + self.l3_w.unwrap_or(0.0);
        let generator = if self.generator_running {
            self.generator_w.unwrap_or(0.0)
        } else {
            0.0
        };
        let sources = self.pv_ac_w? + generator + self.battery_w?.max(0.0);
        Some(loads - sources)
    }
}
