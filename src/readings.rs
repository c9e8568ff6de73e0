//! Typed readings and the provider seam
//!
//! Every metering source, live or fixture, hands the bridge a [`Reading`]
//! per [`Channel`] per cycle. Consumers only ever see the typed value and
//! its validity; they do not know which device produced it.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inverter operating state reported on [`Channel::InverterMode`]
pub const INVERTER_MODE_INVERT: f64 = 1.0;
pub const INVERTER_MODE_PASSTHROUGH: f64 = 3.0;

/// Input channels read every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Primary inverter AC output (L1)
    InverterPower,
    /// Battery power, sign per topology configuration
    BatteryPower,
    /// Generator meter
    GeneratorPower,
    /// Additional AC leg L2
    AcLeg2Power,
    /// Additional AC leg L3
    AcLeg3Power,
    /// Numeric inverter state (0 off, 1 invert, 2 charge, 3 passthrough)
    InverterMode,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::InverterPower,
        Channel::BatteryPower,
        Channel::GeneratorPower,
        Channel::AcLeg2Power,
        Channel::AcLeg3Power,
        Channel::InverterMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::InverterPower => "inverter_power",
            Channel::BatteryPower => "battery_power",
            Channel::GeneratorPower => "generator_power",
            Channel::AcLeg2Power => "ac_leg2_power",
            Channel::AcLeg3Power => "ac_leg3_power",
            Channel::InverterMode => "inverter_mode",
        }
    }

    /// True for channels carrying watts
    pub fn is_power(self) -> bool {
        !matches!(self, Channel::InverterMode)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One sample of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub channel: Channel,
    pub value_w: f64,
    pub valid: bool,
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// A reading carrying a value. Non-finite values are stored as invalid.
    pub fn valid(channel: Channel, value_w: f64) -> Self {
        Self::valid_at(channel, value_w, Utc::now())
    }

    pub fn valid_at(channel: Channel, value_w: f64, captured_at: DateTime<Utc>) -> Self {
        if value_w.is_finite() {
            Self {
                channel,
                value_w,
                valid: true,
                captured_at,
            }
        } else {
            Self::unavailable_at(channel, captured_at)
        }
    }

    /// A reading for a channel that could not be read this cycle
    pub fn unavailable(channel: Channel) -> Self {
        Self::unavailable_at(channel, Utc::now())
    }

    pub fn unavailable_at(channel: Channel, captured_at: DateTime<Utc>) -> Self {
        Self {
            channel,
            value_w: 0.0,
            valid: false,
            captured_at,
        }
    }

    /// The value if the reading is usable
    pub fn value(&self) -> Option<f64> {
        self.valid.then_some(self.value_w)
    }

    /// Same reading with a different value (validity rules reapplied)
    pub fn with_value(&self, value: Option<f64>) -> Self {
        match value {
            Some(v) => Self::valid_at(self.channel, v, self.captured_at),
            None => Self::unavailable_at(self.channel, self.captured_at),
        }
    }
}

/// Source of readings. Fixture and live providers implement the same seam.
#[async_trait]
pub trait ReadingProvider: Send {
    /// Read one channel. An `Err` is treated like an unavailable reading.
    async fn read(&mut self, channel: Channel) -> Result<Reading>;

    /// Short description for logs
    fn describe(&self) -> String {
        "provider".to_string()
    }
}

#[async_trait]
impl<T: ReadingProvider + ?Sized> ReadingProvider for Box<T> {
    async fn read(&mut self, channel: Channel) -> Result<Reading> {
        (**self).read(channel).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
