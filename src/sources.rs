//! Reading providers
//!
//! [`FixtureProvider`] feeds deterministic test-mode scenarios;
//! [`ConfiguredProvider`] routes every channel to the source named in the
//! configuration (fixed value, remote D-Bus item or Modbus register).

use crate::config::Config;
use crate::readings::ReadingProvider;

mod configured;
mod fixture;

pub use configured::ConfiguredProvider;
pub use fixture::{BatteryModel, FixtureFrame, FixtureProvider, ScenarioValues, scenario_values};

/// Provider selected by the configuration
pub fn build_provider(config: &Config) -> Box<dyn ReadingProvider> {
    if config.testmode.enabled() {
        Box::new(FixtureProvider::new(
            &config.testmode,
            config.topology.battery_sign,
        ))
    } else {
        Box::new(ConfiguredProvider::new(
            &config.sources,
            std::time::Duration::from_millis(config.read_timeout_ms),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scenario;

    #[test]
    fn testmode_selects_fixture() {
        let mut config = Config::default();
        assert_eq!(build_provider(&config).describe(), "configured sources");
        config.testmode.scenario = Scenario::Night;
        assert_eq!(build_provider(&config).describe(), "fixture scenario night");
    }
}
