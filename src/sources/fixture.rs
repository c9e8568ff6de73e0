use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;

use crate::config::{BatterySign, Scenario, TestModeConfig};
use crate::error::Result;
use crate::readings::{
    Channel, INVERTER_MODE_INVERT, INVERTER_MODE_PASSTHROUGH, Reading, ReadingProvider,
};

const BATTERY_CAPACITY_WH: f64 = 5000.0;
const DISCHARGE_EFFICIENCY: f64 = 0.97;
const CHARGE_EFFICIENCY: f64 = 0.95;

/// Loads and sources of one scenario
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioValues {
    pub l1_w: f64,
    pub l2_w: f64,
    pub l3_w: f64,
    pub pv_ac_w: f64,
    pub pv_dc_w: f64,
    pub generator_w: f64,
}

/// Scenario values with configured overrides applied
pub fn scenario_values(cfg: &TestModeConfig) -> ScenarioValues {
    let (l1, pv_ac, generator) = match cfg.scenario {
        Scenario::Off => (cfg.l1_w.unwrap_or(0.0), cfg.pv_ac_w.unwrap_or(0.0), 0.0),
        Scenario::Night => (cfg.l1_w.unwrap_or(400.0), 0.0, 0.0),
        Scenario::Day => {
            let l1 = cfg.l1_w.unwrap_or(500.0);
            (l1, l1, 0.0)
        }
        Scenario::DayPlusBatt => (cfg.l1_w.unwrap_or(800.0), cfg.pv_ac_w.unwrap_or(500.0), 0.0),
        Scenario::DaySurplus => (cfg.l1_w.unwrap_or(300.0), cfg.pv_ac_w.unwrap_or(600.0), 0.0),
        Scenario::Gen => (
            cfg.l1_w.unwrap_or(1600.0),
            cfg.pv_ac_w.unwrap_or(500.0),
            cfg.generator_w.unwrap_or(1200.0),
        ),
        Scenario::Custom => (
            cfg.l1_w.unwrap_or(900.0),
            cfg.pv_ac_w.unwrap_or(620.0),
            cfg.generator_w.unwrap_or(0.0),
        ),
    };
    ScenarioValues {
        l1_w: l1,
        l2_w: cfg.l2_w,
        l3_w: cfg.l3_w,
        pv_ac_w: pv_ac,
        pv_dc_w: cfg.pv_dc_w,
        generator_w: generator,
    }
}

/// Battery that balances loads against sources
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryModel {
    pub soc: f64,
    pub voltage: f64,
    pub current: f64,
    /// Discharge-positive
    pub power: f64,
    pub capacity_wh: f64,
}

impl BatteryModel {
    pub fn step(&mut self, dt_secs: f64, loads_w: f64, sources_w: f64) {
        let power = loads_w - sources_w;
        let dt = dt_secs.max(0.0);
        let stored_wh = if power > 0.0 {
            -(power * dt / 3600.0) / DISCHARGE_EFFICIENCY
        } else {
            -power * dt / 3600.0 * CHARGE_EFFICIENCY
        };
        let d_soc = stored_wh / self.capacity_wh.max(1.0) * 100.0;
        self.soc = (self.soc + d_soc).clamp(0.0, 100.0);
        self.power = power;
        self.current = power / self.voltage.max(1.0);
    }
}

/// Everything the fixture reports for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixtureFrame {
    pub values: ScenarioValues,
    /// Discharge-positive
    pub battery_w: f64,
    pub mode: f64,
}

/// Deterministic provider for test mode
pub struct FixtureProvider {
    cfg: TestModeConfig,
    battery_sign: BatterySign,
    battery: BatteryModel,
    frame: Option<FixtureFrame>,
    served: HashSet<Channel>,
    last_step: Option<Instant>,
}

impl FixtureProvider {
    pub fn new(cfg: &TestModeConfig, battery_sign: BatterySign) -> Self {
        Self {
            cfg: cfg.clone(),
            battery_sign,
            battery: BatteryModel {
                soc: cfg.battery.soc,
                voltage: cfg.battery.voltage,
                current: cfg.battery.current,
                power: cfg.battery.power,
                capacity_wh: BATTERY_CAPACITY_WH,
            },
            frame: None,
            served: HashSet::new(),
            last_step: None,
        }
    }

    pub fn battery(&self) -> &BatteryModel {
        &self.battery
    }

    /// Compute the next frame, advancing the battery by `dt_secs`
    pub fn step(&mut self, dt_secs: f64) -> FixtureFrame {
        let values = scenario_values(&self.cfg);
        if self.cfg.battery.override_values {
            self.battery.voltage = self.cfg.battery.voltage;
            self.battery.current = self.cfg.battery.current;
            self.battery.power = self.cfg.battery.power;
            self.battery.soc = self.cfg.battery.soc;
        } else {
            let loads = values.l1_w + values.l2_w + values.l3_w;
            let sources = values.pv_ac_w + values.pv_dc_w + values.generator_w;
            self.battery.step(dt_secs, loads, sources);
        }
        let mode = if self.cfg.scenario == Scenario::Gen && values.generator_w > 0.0 {
            INVERTER_MODE_PASSTHROUGH
        } else {
            INVERTER_MODE_INVERT
        };
        let frame = FixtureFrame {
            values,
            battery_w: self.battery.power,
            mode,
        };
        self.frame = Some(frame);
        frame
    }

    fn frame_for(&mut self, channel: Channel) -> FixtureFrame {
        // A channel asked for twice means a new cycle has started
        let stale = self.served.contains(&channel);
        match self.frame {
            Some(frame) if !stale => {
                self.served.insert(channel);
                frame
            }
            _ => {
                let now = Instant::now();
                let dt = self
                    .last_step
                    .map(|t| now.saturating_duration_since(t).as_secs_f64())
                    .unwrap_or(0.0);
                self.last_step = Some(now);
                self.served.clear();
                self.served.insert(channel);
                self.step(dt)
            }
        }
    }
}

#[async_trait]
impl ReadingProvider for FixtureProvider {
    async fn read(&mut self, channel: Channel) -> Result<Reading> {
        let frame = self.frame_for(channel);
        let value = match channel {
            Channel::InverterPower => frame.values.l1_w,
            Channel::BatteryPower => match self.battery_sign {
                BatterySign::DischargePositive => frame.battery_w,
                BatterySign::ChargePositive => -frame.battery_w,
            },
            Channel::GeneratorPower => frame.values.generator_w,
            Channel::AcLeg2Power => frame.values.l2_w,
            Channel::AcLeg3Power => frame.values.l3_w,
            Channel::InverterMode => frame.mode,
        };
        Ok(Reading::valid(channel, value))
    }

    fn describe(&self) -> String {
        let scenario = serde_yaml::to_string(&self.cfg.scenario)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| format!("{:?}", self.cfg.scenario));
        format!("fixture scenario {}", scenario)
    }
}
