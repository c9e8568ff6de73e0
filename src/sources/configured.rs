use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{ModbusSourceConfig, SourceConfig, SourcesConfig};
use crate::dbus::RemoteReader;
use crate::error::{BridgeError, Result};
use crate::modbus::{ModbusClient, ModbusConnectionManager};
use crate::readings::{Channel, Reading, ReadingProvider};

/// Venus answers local calls well within this bound
const DBUS_CALL_TIMEOUT: Duration = Duration::from_millis(600);

/// Live provider routing each channel to its configured source
pub struct ConfiguredProvider {
    sources: SourcesConfig,
    remote: RemoteReader,
    modbus: HashMap<String, ModbusConnectionManager>,
    read_timeout: Duration,
}

impl ConfiguredProvider {
    pub fn new(sources: &SourcesConfig, read_timeout: Duration) -> Self {
        Self {
            sources: sources.clone(),
            remote: RemoteReader::new(DBUS_CALL_TIMEOUT.min(read_timeout)),
            modbus: HashMap::new(),
            read_timeout,
        }
    }

    fn source(&self, channel: Channel) -> &SourceConfig {
        match channel {
            Channel::InverterPower => &self.sources.inverter_power,
            Channel::BatteryPower => &self.sources.battery_power,
            Channel::GeneratorPower => &self.sources.generator_power,
            Channel::AcLeg2Power => &self.sources.ac_leg2_power,
            Channel::AcLeg3Power => &self.sources.ac_leg3_power,
            Channel::InverterMode => &self.sources.inverter_mode,
        }
    }

    fn modbus_manager(&mut self, cfg: &ModbusSourceConfig) -> &mut ModbusConnectionManager {
        let key = format!("{}:{}", cfg.ip, cfg.port);
        let read_timeout = self.read_timeout;
        // Meters sharing a gateway share one connection
        self.modbus.entry(key).or_insert_with(|| {
            let client = ModbusClient::new(&cfg.ip, cfg.port)
                .with_timeouts(read_timeout, read_timeout.mul_f64(0.8));
            ModbusConnectionManager::new(client, 2, Duration::from_millis(100))
        })
    }
}

#[async_trait]
impl ReadingProvider for ConfiguredProvider {
    async fn read(&mut self, channel: Channel) -> Result<Reading> {
        let value = match self.source(channel).clone() {
            SourceConfig::None => return Ok(Reading::unavailable(channel)),
            SourceConfig::Fixed { value } => value,
            SourceConfig::Dbus {
                service,
                path,
                scale,
            } => self.remote.read_f64(&service, &path).await? * scale,
            SourceConfig::Modbus(cfg) => self.modbus_manager(&cfg).read_value(&cfg).await?,
        };
        if !value.is_finite() {
            return Err(BridgeError::reading(format!(
                "{} produced a non-finite value",
                channel
            )));
        }
        Ok(Reading::valid(channel, value))
    }

    fn describe(&self) -> String {
        "configured sources".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_and_fixed_sources() {
        let sources = SourcesConfig {
            inverter_power: SourceConfig::Fixed { value: 900.0 },
            battery_power: SourceConfig::None,
            ..SourcesConfig::default()
        };
        let mut p = ConfiguredProvider::new(&sources, Duration::from_millis(800));
        let inv = p.read(Channel::InverterPower).await.unwrap();
        assert_eq!(inv.value(), Some(900.0));
        let batt = p.read(Channel::BatteryPower).await.unwrap();
        assert!(!batt.valid);
    }

    #[test]
    fn modbus_connections_are_shared_per_endpoint() {
        let mut p = ConfiguredProvider::new(&SourcesConfig::default(), Duration::from_millis(800));
        let a = ModbusSourceConfig {
            ip: "10.0.0.5".to_string(),
            register: 4,
            ..ModbusSourceConfig::default()
        };
        let b = ModbusSourceConfig {
            unit_id: 2,
            ..a.clone()
        };
        p.modbus_manager(&a);
        p.modbus_manager(&b);
        assert_eq!(p.modbus.len(), 1);
        assert_eq!(p.modbus["10.0.0.5:502"].client().address(), "10.0.0.5:502");
    }
}
