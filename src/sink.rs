//! Publication sink seam
//!
//! The bridge hands gated values to a [`PublicationSink`]. The sink can
//! create an object and update it, but it has no operation for removing
//! one.

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Objects published by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Inverter leg L1
    Inverter,
    /// Derived PV-AC
    PvInverter,
    /// Generator meter
    Generator,
    AcLeg2,
    AcLeg3,
}

impl OutputChannel {
    pub const ALL: [OutputChannel; 5] = [
        OutputChannel::Inverter,
        OutputChannel::PvInverter,
        OutputChannel::Generator,
        OutputChannel::AcLeg2,
        OutputChannel::AcLeg3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutputChannel::Inverter => "inverter",
            OutputChannel::PvInverter => "pvinverter",
            OutputChannel::Generator => "generator",
            OutputChannel::AcLeg2 => "ac_leg2",
            OutputChannel::AcLeg3 => "ac_leg3",
        }
    }

    /// True for channels that carry a forward energy counter
    pub fn has_energy(self) -> bool {
        matches!(
            self,
            OutputChannel::PvInverter | OutputChannel::AcLeg2 | OutputChannel::AcLeg3
        )
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value handed to the sink for one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedValue {
    pub watts: f64,
    pub stale: bool,
    /// Channel-specific extras (inverter state, generator running flag)
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PublishedValue {
    pub fn new(watts: f64, stale: bool) -> Self {
        Self {
            watts,
            stale,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
pub trait PublicationSink: Send {
    /// Create the object for `channel` if it does not exist yet. Idempotent.
    async fn ensure_object(&mut self, channel: OutputChannel) -> Result<()>;

    async fn publish_value(&mut self, channel: OutputChannel, value: &PublishedValue)
    -> Result<()>;

    async fn publish_cumulative_energy(&mut self, channel: OutputChannel, energy_wh: f64)
    -> Result<()>;

    /// End of cycle
    async fn flush(&mut self) -> Result<()>;

    /// Process shutdown
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: PublicationSink + ?Sized> PublicationSink for Box<T> {
    async fn ensure_object(&mut self, channel: OutputChannel) -> Result<()> {
        (**self).ensure_object(channel).await
    }

    async fn publish_value(
        &mut self,
        channel: OutputChannel,
        value: &PublishedValue,
    ) -> Result<()> {
        (**self).publish_value(channel, value).await
    }

    async fn publish_cumulative_energy(
        &mut self,
        channel: OutputChannel,
        energy_wh: f64,
    ) -> Result<()> {
        (**self).publish_cumulative_energy(channel, energy_wh).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Dry-run sink: logs what would be published
pub struct LogSink {
    logger: StructuredLogger,
    objects: HashMap<OutputChannel, PublishedValue>,
    energy: HashMap<OutputChannel, f64>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            logger: get_logger("sink"),
            objects: HashMap::new(),
            energy: HashMap::new(),
        }
    }

    pub fn last_value(&self, channel: OutputChannel) -> Option<&PublishedValue> {
        self.objects.get(&channel)
    }

    pub fn last_energy_wh(&self, channel: OutputChannel) -> Option<f64> {
        self.energy.get(&channel).copied()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublicationSink for LogSink {
    async fn ensure_object(&mut self, channel: OutputChannel) -> Result<()> {
        if !self.objects.contains_key(&channel) {
            self.logger.info(&format!("register {}", channel));
            self.objects
                .insert(channel, PublishedValue::new(0.0, false));
        }
        Ok(())
    }

    async fn publish_value(
        &mut self,
        channel: OutputChannel,
        value: &PublishedValue,
    ) -> Result<()> {
        self.logger.debug(&format!(
            "{} power={:.0}W stale={}",
            channel, value.watts, value.stale
        ));
        self.objects.insert(channel, value.clone());
        Ok(())
    }

    async fn publish_cumulative_energy(
        &mut self,
        channel: OutputChannel,
        energy_wh: f64,
    ) -> Result<()> {
        self.logger
            .debug(&format!("{} forward={:.3}kWh", channel, energy_wh / 1000.0));
        self.energy.insert(channel, energy_wh);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_keeps_last_values() {
        let mut sink = LogSink::new();
        sink.ensure_object(OutputChannel::PvInverter).await.unwrap();
        sink.publish_value(OutputChannel::PvInverter, &PublishedValue::new(680.0, false))
            .await
            .unwrap();
        sink.publish_cumulative_energy(OutputChannel::PvInverter, 1500.0)
            .await
            .unwrap();
        // A second ensure must not reset the value
        sink.ensure_object(OutputChannel::PvInverter).await.unwrap();

        assert_eq!(
            sink.last_value(OutputChannel::PvInverter).map(|v| v.watts),
            Some(680.0)
        );
        assert_eq!(sink.last_energy_wh(OutputChannel::PvInverter), Some(1500.0));
        assert!(sink.last_value(OutputChannel::Generator).is_none());
    }

    #[test]
    fn energy_channels() {
        assert!(OutputChannel::PvInverter.has_energy());
        assert!(!OutputChannel::Inverter.has_energy());
        let v = PublishedValue::new(1.0, true).with_extra("running", serde_json::json!(1));
        assert_eq!(v.extra.get("running"), Some(&serde_json::json!(1)));
    }
}
