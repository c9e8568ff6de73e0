use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use crate::config::ServicesConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::sink::{OutputChannel, PublicationSink, PublishedValue};

use super::service::DbusService;

/// Name, identity and limits of the service backing one output channel
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLayout {
    pub channel: OutputChannel,
    pub service_name: String,
    pub device_instance: u32,
    pub product_name: &'static str,
    pub product_id: u32,
    pub power_limit: u32,
    pub nominal_voltage: f64,
}

impl ServiceLayout {
    pub fn for_channel(channel: OutputChannel, cfg: &ServicesConfig) -> Self {
        let (base, device_instance, product_name, product_id, power_limit) = match channel {
            OutputChannel::Inverter => (
                "com.victronenergy.inverter.outback_l1",
                cfg.inverter_instance,
                "Outback SPC III (L1)",
                0xA001,
                cfg.l1_power_limit,
            ),
            OutputChannel::PvInverter => (
                "com.victronenergy.pvinverter.outback_l1",
                cfg.pvinverter_instance,
                "AC-PV (Outback L1)",
                0xA002,
                cfg.l1_power_limit,
            ),
            OutputChannel::Generator => (
                "com.victronenergy.grid.generator_tuya",
                cfg.generator_instance,
                "Generator via Tuya",
                0xA003,
                cfg.l1_power_limit,
            ),
            OutputChannel::AcLeg2 => (
                "com.victronenergy.acmeter.et112_l2",
                cfg.l2_instance,
                "ET112 (L2)",
                0xA004,
                cfg.l2_power_limit,
            ),
            OutputChannel::AcLeg3 => (
                "com.victronenergy.acmeter.et112_l3",
                cfg.l3_instance,
                "ET112 (L3)",
                0xA004,
                cfg.l3_power_limit,
            ),
        };
        Self {
            channel,
            service_name: format!("{}{}", cfg.prefix, base),
            device_instance,
            product_name,
            product_id,
            power_limit,
            nominal_voltage: cfg.nominal_voltage,
        }
    }

    fn phase(&self) -> &'static str {
        match self.channel {
            OutputChannel::AcLeg2 => "L2",
            OutputChannel::AcLeg3 => "L3",
            _ => "L1",
        }
    }

    /// Mandatory and static paths, set once when the service is created
    pub fn initial_paths(&self, test_mode: bool) -> Vec<(String, serde_json::Value)> {
        let version = env!("APP_VERSION");
        let mut paths = vec![
            ("/DeviceInstance".to_string(), json!(self.device_instance)),
            ("/ProductName".to_string(), json!(self.product_name)),
            ("/ProductId".to_string(), json!(self.product_id)),
            ("/FirmwareVersion".to_string(), json!(version)),
            ("/Connected".to_string(), json!(1)),
            ("/Mgmt/ProcessName".to_string(), json!(env!("CARGO_PKG_NAME"))),
            ("/Mgmt/ProcessVersion".to_string(), json!(version)),
            ("/Mgmt/Connection".to_string(), json!(self.connection_label())),
            ("/UpdateIndex".to_string(), json!(0)),
            ("/Info/TestMode".to_string(), json!(i32::from(test_mode))),
            ("/Info/Stale".to_string(), json!(0)),
        ];
        let phase = self.phase();
        match self.channel {
            OutputChannel::Inverter => {
                paths.push(("/State".to_string(), json!(0)));
                paths.push(("/Ac/Out/L1/PowerLimit".to_string(), json!(self.power_limit)));
            }
            OutputChannel::PvInverter => {
                paths.push(("/Position".to_string(), json!(1)));
                paths.push(("/Ac/Out/L1/PowerLimit".to_string(), json!(self.power_limit)));
                paths.push(("/Ac/L1/Energy/Forward".to_string(), json!(0.0)));
                paths.push(("/Ac/Energy/Forward".to_string(), json!(0.0)));
            }
            OutputChannel::Generator => {
                paths.push(("/Status/Running".to_string(), json!(0)));
                paths.push(("/Ac/Out/L1/PowerLimit".to_string(), json!(self.power_limit)));
            }
            OutputChannel::AcLeg2 | OutputChannel::AcLeg3 => {
                paths.push((
                    format!("/Ac/Out/{}/PowerLimit", phase),
                    json!(self.power_limit),
                ));
                paths.push(("/Ac/Energy/Forward".to_string(), json!(0.0)));
            }
        }
        paths
    }

    fn connection_label(&self) -> &'static str {
        match self.channel {
            OutputChannel::Inverter => "Outback BLE",
            OutputChannel::PvInverter => "Derived from inverter and battery",
            OutputChannel::Generator => "Tuya plug",
            OutputChannel::AcLeg2 | OutputChannel::AcLeg3 => "ET112",
        }
    }

    fn electrical(&self, watts: f64, energised: bool) -> (f64, f64) {
        if energised && self.nominal_voltage > 0.0 {
            (self.nominal_voltage, round_to(watts / self.nominal_voltage, 2))
        } else {
            (0.0, 0.0)
        }
    }

    /// Paths carrying one published value
    pub fn value_paths(&self, value: &PublishedValue) -> Vec<(String, serde_json::Value)> {
        let watts = round_to(value.watts.max(0.0), 1);
        let mut paths = vec![("/Info/Stale".to_string(), json!(i32::from(value.stale)))];
        match self.channel {
            OutputChannel::Inverter => {
                let (v, i) = self.electrical(watts, true);
                paths.push(("/Ac/Out/L1/Voltage".to_string(), json!(v)));
                paths.push(("/Ac/Out/L1/Current".to_string(), json!(i)));
                paths.push(("/Ac/Out/L1/Power".to_string(), json!(watts)));
                if let Some(state) = value.extra.get("state") {
                    paths.push(("/State".to_string(), state.clone()));
                }
            }
            OutputChannel::PvInverter => {
                paths.push(("/Ac/L1/Power".to_string(), json!(watts)));
                paths.push(("/Ac/Power".to_string(), json!(watts)));
            }
            OutputChannel::Generator => {
                let running = value
                    .extra
                    .get("running")
                    .and_then(|r| r.as_i64().or_else(|| r.as_bool().map(i64::from)))
                    .unwrap_or(0)
                    > 0;
                let watts = if running { watts } else { 0.0 };
                let (v, i) = self.electrical(watts, running);
                paths.push(("/Ac/L1/Voltage".to_string(), json!(v)));
                paths.push(("/Ac/L1/Current".to_string(), json!(i)));
                paths.push(("/Ac/L1/Power".to_string(), json!(watts)));
                paths.push(("/Status/Running".to_string(), json!(i32::from(running))));
            }
            OutputChannel::AcLeg2 | OutputChannel::AcLeg3 => {
                let phase = self.phase();
                let (v, i) = self.electrical(watts, watts > 0.0);
                paths.push((format!("/Ac/Out/{}/Voltage", phase), json!(v)));
                paths.push((format!("/Ac/Out/{}/Current", phase), json!(i)));
                paths.push((format!("/Ac/Out/{}/Power", phase), json!(watts)));
            }
        }
        paths
    }

    /// Paths carrying the forward energy counter (kWh)
    pub fn energy_paths(&self, energy_wh: f64) -> Vec<(String, serde_json::Value)> {
        let kwh = json!(round_to(energy_wh.max(0.0) / 1000.0, 3));
        match self.channel {
            OutputChannel::PvInverter => vec![
                ("/Ac/L1/Energy/Forward".to_string(), kwh.clone()),
                ("/Ac/Energy/Forward".to_string(), kwh),
            ],
            OutputChannel::AcLeg2 | OutputChannel::AcLeg3 => {
                vec![("/Ac/Energy/Forward".to_string(), kwh)]
            }
            OutputChannel::Inverter | OutputChannel::Generator => Vec::new(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

struct VenusService {
    bus: DbusService,
    update_index: u8,
    changed: bool,
}

/// Publishes output channels as Venus OS D-Bus services
pub struct VenusSink {
    services_cfg: ServicesConfig,
    test_mode: bool,
    connect: bool,
    services: BTreeMap<OutputChannel, VenusService>,
    logger: StructuredLogger,
}

impl VenusSink {
    pub fn new(services_cfg: &ServicesConfig, test_mode: bool) -> Self {
        Self {
            services_cfg: services_cfg.clone(),
            test_mode,
            connect: true,
            services: BTreeMap::new(),
            logger: get_logger("venus"),
        }
    }

    /// Keeps all path tables in memory without touching the bus
    pub fn offline(services_cfg: &ServicesConfig, test_mode: bool) -> Self {
        Self {
            connect: false,
            ..Self::new(services_cfg, test_mode)
        }
    }

    pub fn is_registered(&self, channel: OutputChannel) -> bool {
        self.services.contains_key(&channel)
    }

    /// Current value of a path on a channel's service
    pub fn value(&self, channel: OutputChannel, path: &str) -> Option<serde_json::Value> {
        self.services
            .get(&channel)
            .and_then(|svc| svc.bus.value(path))
    }

    fn service_mut(&mut self, channel: OutputChannel) -> Result<&mut VenusService> {
        self.services
            .get_mut(&channel)
            .ok_or_else(|| BridgeError::dbus(format!("Service for {} is not registered", channel)))
    }

    async fn apply(
        &mut self,
        channel: OutputChannel,
        updates: Vec<(String, serde_json::Value)>,
    ) -> Result<()> {
        let svc = self.service_mut(channel)?;
        if svc.bus.update_paths(updates).await? > 0 {
            svc.changed = true;
        }
        Ok(())
    }
}

#[async_trait]
impl PublicationSink for VenusSink {
    async fn ensure_object(&mut self, channel: OutputChannel) -> Result<()> {
        if self.services.contains_key(&channel) {
            return Ok(());
        }
        let layout = ServiceLayout::for_channel(channel, &self.services_cfg);
        let mut bus = DbusService::new(&layout.service_name)?;
        for (path, value) in layout.initial_paths(self.test_mode) {
            bus.ensure_item(&path, value).await?;
        }
        for (path, value) in layout.value_paths(&PublishedValue::new(0.0, false)) {
            bus.ensure_item(&path, value).await?;
        }
        if self.connect {
            bus.start().await?;
        }
        self.logger.info(&format!(
            "Registered {} (instance {})",
            layout.service_name, layout.device_instance
        ));
        self.services.insert(
            channel,
            VenusService {
                bus,
                update_index: 0,
                changed: false,
            },
        );
        Ok(())
    }

    async fn publish_value(
        &mut self,
        channel: OutputChannel,
        value: &PublishedValue,
    ) -> Result<()> {
        let updates = ServiceLayout::for_channel(channel, &self.services_cfg).value_paths(value);
        self.apply(channel, updates).await
    }

    async fn publish_cumulative_energy(
        &mut self,
        channel: OutputChannel,
        energy_wh: f64,
    ) -> Result<()> {
        let updates = ServiceLayout::for_channel(channel, &self.services_cfg).energy_paths(energy_wh);
        self.apply(channel, updates).await
    }

    async fn flush(&mut self) -> Result<()> {
        let mut first_err = None;
        for svc in self.services.values_mut() {
            if !svc.changed {
                continue;
            }
            svc.update_index = svc.update_index.wrapping_add(1);
            match svc
                .bus
                .update_path("/UpdateIndex", json!(svc.update_index))
                .await
            {
                Ok(_) => svc.changed = false,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn close(&mut self) -> Result<()> {
        for svc in self.services.values_mut() {
            svc.bus.stop().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServicesConfig {
        ServicesConfig::default()
    }

    #[test]
    fn service_names_and_instances() {
        let pv = ServiceLayout::for_channel(OutputChannel::PvInverter, &cfg());
        assert_eq!(pv.service_name, "com.victronenergy.pvinverter.outback_l1");
        assert_eq!(pv.device_instance, 28);

        let mut prefixed = cfg();
        prefixed.prefix = "test.".to_string();
        let l3 = ServiceLayout::for_channel(OutputChannel::AcLeg3, &prefixed);
        assert_eq!(l3.service_name, "test.com.victronenergy.acmeter.et112_l3");
        assert_eq!(l3.power_limit, 1500);
    }

    #[test]
    fn pv_service_has_position_and_energy() {
        let pv = ServiceLayout::for_channel(OutputChannel::PvInverter, &cfg());
        let paths: BTreeMap<_, _> = pv.initial_paths(true).into_iter().collect();
        assert_eq!(paths["/Position"], json!(1));
        assert_eq!(paths["/Info/TestMode"], json!(1));
        assert!(paths.contains_key("/Mgmt/Connection"));

        let energy: BTreeMap<_, _> = pv.energy_paths(1234.0).into_iter().collect();
        assert_eq!(energy["/Ac/Energy/Forward"], json!(1.234));
        assert_eq!(energy["/Ac/L1/Energy/Forward"], json!(1.234));
    }

    #[test]
    fn generator_publishes_zero_when_not_running() {
        let generator = ServiceLayout::for_channel(OutputChannel::Generator, &cfg());
        let idle = PublishedValue::new(150.0, false).with_extra("running", json!(0));
        let paths: BTreeMap<_, _> = generator.value_paths(&idle).into_iter().collect();
        assert_eq!(paths["/Ac/L1/Power"], json!(0.0));
        assert_eq!(paths["/Status/Running"], json!(0));

        let running = PublishedValue::new(1150.0, false).with_extra("running", json!(1));
        let paths: BTreeMap<_, _> = generator.value_paths(&running).into_iter().collect();
        assert_eq!(paths["/Ac/L1/Current"], json!(5.0));
        assert_eq!(paths["/Ac/L1/Voltage"], json!(230.0));
    }

    #[tokio::test]
    async fn update_index_moves_only_on_change() {
        let mut sink = VenusSink::offline(&cfg(), false);
        sink.ensure_object(OutputChannel::AcLeg2).await.unwrap();
        assert!(sink.is_registered(OutputChannel::AcLeg2));

        sink.publish_value(OutputChannel::AcLeg2, &PublishedValue::new(460.0, false))
            .await
            .unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.value(OutputChannel::AcLeg2, "/UpdateIndex"), Some(json!(1)));
        assert_eq!(sink.value(OutputChannel::AcLeg2, "/Ac/Out/L2/Current"), Some(json!(2.0)));

        // Same value again: nothing changes
        sink.publish_value(OutputChannel::AcLeg2, &PublishedValue::new(460.0, false))
            .await
            .unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.value(OutputChannel::AcLeg2, "/UpdateIndex"), Some(json!(1)));

        sink.publish_cumulative_energy(OutputChannel::AcLeg2, 500.0)
            .await
            .unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.value(OutputChannel::AcLeg2, "/UpdateIndex"), Some(json!(2)));
    }

    #[tokio::test]
    async fn publish_before_register_fails() {
        let mut sink = VenusSink::offline(&cfg(), false);
        let r = sink
            .publish_value(OutputChannel::Inverter, &PublishedValue::new(1.0, false))
            .await;
        assert!(r.is_err());
    }
}
