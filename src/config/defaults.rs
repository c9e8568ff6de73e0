use super::*;

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            battery_sign: BatterySign::DischargePositive,
            charge_source: ChargeSource::AcPv,
            generator_on_inverter_leg: true,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            on_threshold_w: 200.0,
            hysteresis_w: 100.0,
            min_runtime_secs: 7.0,
            require_passthrough: true,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { alpha: 0.3 }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            inverter_instance: 18,
            pvinverter_instance: 28,
            generator_instance: 38,
            l2_instance: 48,
            l3_instance: 58,
            l1_power_limit: 3000,
            l2_power_limit: 3000,
            l3_power_limit: 1500,
            nominal_voltage: 230.0,
        }
    }
}

impl Default for ModbusSourceConfig {
    fn default() -> Self {
        // ET112 total active power: input registers 0x0004..0x0005, W * 10
        Self {
            ip: "192.168.1.100".to_string(),
            port: 502,
            unit_id: 1,
            register: 0x0004,
            register_type: RegisterType::Input,
            encoding: RegisterEncoding::I32LswFirst,
            scale: 0.1,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::None
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            inverter_power: SourceConfig::None,
            // Venus reports charge-positive; flip it to discharge-positive
            battery_power: SourceConfig::Dbus {
                service: "com.victronenergy.system".to_string(),
                path: "/Dc/Battery/Power".to_string(),
                scale: -1.0,
            },
            generator_power: SourceConfig::None,
            ac_leg2_power: SourceConfig::None,
            ac_leg3_power: SourceConfig::None,
            inverter_mode: SourceConfig::None,
        }
    }
}

impl Default for TestBatteryConfig {
    fn default() -> Self {
        Self {
            voltage: 52.0,
            current: 0.0,
            power: 0.0,
            soc: 75.0,
            override_values: false,
        }
    }
}

impl Default for TestModeConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::Off,
            l1_w: None,
            l2_w: 0.0,
            l3_w: 0.0,
            pv_ac_w: None,
            pv_dc_w: 0.0,
            generator_w: None,
            battery: TestBatteryConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/data/offgrid_bridge/log/offgrid_bridge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
            rate_limit_ms: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            read_timeout_ms: 800,
            max_elapsed_secs: 10.0,
            stale_threshold: 5,
            timezone: "UTC".to_string(),
            state_file: "/data/offgrid_bridge/state.json".to_string(),
            dry_run: false,
            require_dbus: false,
            balance_check: false,
            summary_period_secs: 5,
            topology: TopologyConfig::default(),
            generator: GeneratorConfig::default(),
            smoothing: SmoothingConfig::default(),
            services: ServicesConfig::default(),
            sources: SourcesConfig::default(),
            testmode: TestModeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
