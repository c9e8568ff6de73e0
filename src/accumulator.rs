//! Forward-only energy counters
//!
//! A counter integrates power over time into watt-hours. Within a day it
//! never decreases; a daily counter restarts at zero exactly once when the
//! calendar day moves forward.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// When a counter returns to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Reset at the first sample of each new calendar day
    Daily,
    /// Lifetime counter
    Never,
}

/// Durable part of a counter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub energy_wh: f64,
    #[serde(default)]
    pub day: Option<NaiveDate>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl AccumulatorState {
    /// Repairs values a hand-edited or truncated file could carry
    pub fn sanitized(mut self) -> Self {
        if !self.energy_wh.is_finite() || self.energy_wh < 0.0 {
            self.energy_wh = 0.0;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct EnergyAccumulator {
    state: AccumulatorState,
    policy: ResetPolicy,
    dirty: bool,
}

impl EnergyAccumulator {
    pub fn new(policy: ResetPolicy) -> Self {
        Self::from_state(AccumulatorState::default(), policy)
    }

    pub fn from_state(state: AccumulatorState, policy: ResetPolicy) -> Self {
        Self {
            state: state.sanitized(),
            policy,
            dirty: false,
        }
    }

    /// Advance the counter by one sample and return the energy in Wh.
    ///
    /// `sample` is `None` when the power is unavailable; the counter then
    /// stays flat. Negative samples count as no production.
    pub fn advance(&mut self, current_day: NaiveDate, sample: Option<f64>, elapsed_secs: f64) -> f64 {
        if self.policy == ResetPolicy::Daily {
            match self.state.day {
                Some(day) if current_day <= day => {}
                _ => {
                    // Forward rollover or first day: reset before integrating
                    self.state.energy_wh = 0.0;
                    self.state.day = Some(current_day);
                    self.touch();
                }
            }
        }

        let Some(power) = sample.filter(|p| p.is_finite()) else {
            return self.state.energy_wh;
        };
        if !(elapsed_secs.is_finite() && elapsed_secs > 0.0) {
            return self.state.energy_wh;
        }

        let delta = power.max(0.0) * elapsed_secs / 3600.0;
        let previous = self.state.energy_wh;
        let next = previous.max(previous + delta);
        if next != previous {
            self.state.energy_wh = next;
            self.touch();
        }
        self.state.energy_wh
    }

    fn touch(&mut self) {
        self.state.last_update = Some(Utc::now());
        self.dirty = true;
    }

    pub fn energy_wh(&self) -> f64 {
        self.state.energy_wh
    }

    pub fn energy_kwh(&self) -> f64 {
        self.state.energy_wh / 1000.0
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.state.day
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Called once the state has been written out
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn integrates_watt_hours() {
        let mut acc = EnergyAccumulator::new(ResetPolicy::Daily);
        acc.advance(day(1), Some(3600.0), 1.0);
        let e = acc.advance(day(1), Some(1800.0), 2.0);
        assert!((e - 2.0).abs() < 1e-9);
        assert!(acc.is_dirty());
    }

    #[test]
    fn invalid_and_negative_hold_flat() {
        let mut acc = EnergyAccumulator::new(ResetPolicy::Daily);
        acc.advance(day(1), Some(3600.0), 1.0);
        acc.mark_clean();
        assert_eq!(acc.advance(day(1), None, 1.0), 1.0);
        assert_eq!(acc.advance(day(1), Some(-500.0), 1.0), 1.0);
        assert_eq!(acc.advance(day(1), Some(f64::NAN), 1.0), 1.0);
        assert!(!acc.is_dirty());
    }

    #[test]
    fn rollover_resets_before_integrating() {
        let mut acc = EnergyAccumulator::new(ResetPolicy::Daily);
        acc.advance(day(1), Some(1000.0), 3600.0);
        let e = acc.advance(day(2), Some(360.0), 10.0);
        assert!((e - 1.0).abs() < 1e-9);
        assert_eq!(acc.day(), Some(day(2)));
    }

    #[test]
    fn backward_day_does_not_reset() {
        let mut acc = EnergyAccumulator::new(ResetPolicy::Daily);
        acc.advance(day(5), Some(3600.0), 1.0);
        let e = acc.advance(day(4), Some(3600.0), 1.0);
        assert!((e - 2.0).abs() < 1e-9);
        assert_eq!(acc.day(), Some(day(5)));
    }

    #[test]
    fn lifetime_counter_never_resets() {
        let mut acc = EnergyAccumulator::new(ResetPolicy::Never);
        acc.advance(day(1), Some(3600.0), 1.0);
        let e = acc.advance(day(2), Some(3600.0), 1.0);
        assert!((e - 2.0).abs() < 1e-9);
        assert_eq!(acc.day(), None);
    }

    #[test]
    fn restored_state_is_sanitized() {
        let state = AccumulatorState {
            energy_wh: -4.0,
            day: Some(day(1)),
            last_update: None,
        };
        let acc = EnergyAccumulator::from_state(state, ResetPolicy::Daily);
        assert_eq!(acc.energy_wh(), 0.0);
        assert!(!acc.is_dirty());
    }
}
