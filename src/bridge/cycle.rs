use super::{Bridge, CycleSnapshot};
use crate::derivation::{DerivedValue, SystemState, classify_state};
use crate::gate::GateDecision;
use crate::readings::{Channel, Reading, ReadingProvider};
use crate::sink::{OutputChannel, PublicationSink, PublishedValue};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tokio::time::{Duration, timeout};

/// Inputs of one cycle after reading and smoothing
struct CycleInputs {
    readings: BTreeMap<Channel, Reading>,
    l1: Option<f64>,
    generator: Option<f64>,
    l2: Option<f64>,
    l3: Option<f64>,
    mode: Option<f64>,
}

impl CycleInputs {
    fn reading(&self, channel: Channel) -> Reading {
        self.readings
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| Reading::unavailable(channel))
    }
}

impl<P: ReadingProvider, S: PublicationSink> Bridge<P, S> {
    /// Run one cycle as if it happened at `now`, `elapsed` after the last one
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>, elapsed: Duration) -> CycleSnapshot {
        let elapsed_secs = elapsed
            .as_secs_f64()
            .min(self.config.max_elapsed_secs.max(0.0));
        self.total_cycles = self.total_cycles.saturating_add(1);

        let inputs = self.read_inputs(now).await;

        let generator_running = self
            .generator
            .update(inputs.generator, inputs.mode, elapsed_secs);
        // Last known power while the meter is unreadable
        let generator_held = if generator_running {
            self.smoothers.generator.current()
        } else {
            Some(0.0)
        };
        let generator_on_leg = if self.config.topology.generator_on_inverter_leg {
            generator_held
        } else {
            Some(0.0)
        };

        let battery = inputs.reading(Channel::BatteryPower);
        let pv_raw = match generator_on_leg {
            Some(gen_w) => self.derivation.derive(
                &inputs.reading(Channel::InverterPower),
                &battery,
                gen_w,
            ),
            None => DerivedValue::Unavailable,
        };
        let pv = DerivedValue::from_watts(self.smoothers.pv.update(pv_raw.value()));
        let battery_w = battery
            .value()
            .map(|b| self.derivation.discharge_positive(b));

        let system_state = match (pv.value(), inputs.l1, battery_w) {
            (Some(pv_w), Some(l1), Some(batt)) => classify_state(
                pv_w,
                l1,
                batt,
                inputs.mode,
                generator_held.unwrap_or(0.0),
            ),
            _ => SystemState::Unknown,
        };

        let day = now.with_timezone(&self.tz).date_naive();
        self.counters.pv.advance(day, pv.value(), elapsed_secs);
        self.counters.l2.advance(day, inputs.l2, elapsed_secs);
        self.counters.l3.advance(day, inputs.l3, elapsed_secs);

        let generator_published = if generator_running {
            inputs.generator
        } else {
            inputs.generator.map(|_| 0.0)
        };
        let outputs = [
            (OutputChannel::Inverter, inputs.l1),
            (OutputChannel::PvInverter, pv.value()),
            (OutputChannel::Generator, generator_published),
            (OutputChannel::AcLeg2, inputs.l2),
            (OutputChannel::AcLeg3, inputs.l3),
        ];

        let mut sink_errors = 0;
        for (channel, value) in outputs {
            let decision = match self.gates.get_mut(&channel) {
                Some(gate) => gate.observe(&DerivedValue::from_watts(value)),
                None => continue,
            };
            if let Err(e) = self
                .publish(channel, decision, inputs.mode, generator_running)
                .await
            {
                sink_errors += 1;
                self.fault_logger
                    .warn(&format!("Publishing {} failed: {}", channel, e));
            }
        }
        if let Err(e) = self.sink.flush().await {
            sink_errors += 1;
            self.fault_logger.warn(&format!("Sink flush failed: {}", e));
        }

        let persisted = self.persist();

        let snapshot = CycleSnapshot {
            timestamp: now,
            elapsed_secs,
            inputs: inputs
                .readings
                .iter()
                .map(|(channel, reading)| (*channel, reading.value()))
                .collect(),
            l1_w: inputs.l1,
            pv_ac_w: pv.value(),
            generator_w: inputs.generator,
            generator_running,
            l2_w: inputs.l2,
            l3_w: inputs.l3,
            battery_w,
            system_state,
            pv_energy_wh: self.counters.pv.energy_wh(),
            l2_energy_wh: self.counters.l2.energy_wh(),
            l3_energy_wh: self.counters.l3.energy_wh(),
            publications: self
                .gates
                .iter()
                .map(|(channel, gate)| (*channel, gate.state()))
                .collect(),
            sink_errors,
            persisted,
        };
        self.log_cycle(&snapshot);
        snapshot
    }

    /// Read every channel, each bounded by the read timeout
    async fn read_inputs(&mut self, now: DateTime<Utc>) -> CycleInputs {
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));
        let mut readings = BTreeMap::new();

        for channel in Channel::ALL {
            let reading = match timeout(read_timeout, self.provider.read(channel)).await {
                Ok(Ok(reading)) if reading.channel == channel => reading,
                Ok(Ok(reading)) => {
                    self.fault_logger.warn(&format!(
                        "Provider answered {} with a {} reading",
                        channel, reading.channel
                    ));
                    Reading::unavailable_at(channel, now)
                }
                Ok(Err(e)) => {
                    self.fault_logger
                        .warn(&format!("Reading {} failed: {}", channel, e));
                    Reading::unavailable_at(channel, now)
                }
                Err(_) => {
                    self.fault_logger.warn(&format!(
                        "Reading {} timed out after {} ms",
                        channel,
                        read_timeout.as_millis()
                    ));
                    Reading::unavailable_at(channel, now)
                }
            };
            readings.insert(channel, reading);
        }

        let value = |channel: Channel| readings.get(&channel).and_then(Reading::value);
        let (l1, generator, l2, l3, mode) = (
            value(Channel::InverterPower),
            value(Channel::GeneratorPower),
            value(Channel::AcLeg2Power),
            value(Channel::AcLeg3Power),
            value(Channel::InverterMode),
        );

        CycleInputs {
            l1: self.smoothers.l1.update(l1),
            generator: self.smoothers.generator.update(generator),
            l2: self.smoothers.l2.update(l2),
            l3: self.smoothers.l3.update(l3),
            mode,
            readings,
        }
    }

    async fn publish(
        &mut self,
        channel: OutputChannel,
        decision: GateDecision,
        mode: Option<f64>,
        generator_running: bool,
    ) -> crate::error::Result<()> {
        let Some(watts) = decision.value() else {
            return Ok(());
        };

        // Re-issued every cycle so a failed registration is retried
        self.sink.ensure_object(channel).await?;

        let mut value = PublishedValue::new(watts, decision.is_stale());
        match channel {
            OutputChannel::Inverter => {
                if let Some(mode) = mode {
                    value = value.with_extra("state", json!(mode.round() as i64));
                }
            }
            OutputChannel::Generator => {
                value = value.with_extra("running", json!(i32::from(generator_running)));
            }
            _ => {}
        }
        self.sink.publish_value(channel, &value).await?;

        let energy = match channel {
            OutputChannel::PvInverter => Some(self.counters.pv.energy_wh()),
            OutputChannel::AcLeg2 => Some(self.counters.l2.energy_wh()),
            OutputChannel::AcLeg3 => Some(self.counters.l3.energy_wh()),
            _ => None,
        };
        if let Some(energy_wh) = energy {
            self.sink
                .publish_cumulative_energy(channel, energy_wh)
                .await?;
        }
        Ok(())
    }

    fn log_cycle(&mut self, snapshot: &CycleSnapshot) {
        self.logger.debug(&format!(
            "state={} pv_ac={:?} l1={:?} batt={:?} gen_running={}",
            snapshot.system_state,
            snapshot.pv_ac_w,
            snapshot.l1_w,
            snapshot.battery_w,
            snapshot.generator_running
        ));

        if self.config.balance_check
            && let Some(diff) = snapshot.balance_w()
        {
            self.logger
                .debug(&format!("Balance loads-sources={:.0} W", diff));
        }

        let period = self.config.summary_period_secs;
        if period == 0 {
            return;
        }
        self.secs_since_summary += snapshot.elapsed_secs;
        if self.secs_since_summary >= period as f64 {
            self.secs_since_summary = 0.0;
            self.logger.info(&snapshot.summary_line());
        }
    }
}
