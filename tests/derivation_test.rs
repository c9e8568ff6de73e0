use offgrid_bridge::config::{BatterySign, ChargeSource, GeneratorConfig, TopologyConfig};
use offgrid_bridge::derivation::{
    DerivedValue, GeneratorDetector, PvAcDerivation, SystemState, classify_state,
};
use offgrid_bridge::readings::{Channel, INVERTER_MODE_INVERT, INVERTER_MODE_PASSTHROUGH, Reading};

fn derive(topology: &TopologyConfig, l1: f64, batt: f64, generator: f64) -> f64 {
    PvAcDerivation::new(topology)
        .derive(
            &Reading::valid(Channel::InverterPower, l1),
            &Reading::valid(Channel::BatteryPower, batt),
            generator,
        )
        .value()
        .unwrap()
}

#[test]
fn pv_is_bounded_over_a_sweep() {
    for charge_source in [ChargeSource::AcPv, ChargeSource::DcMppt] {
        let topology = TopologyConfig {
            charge_source,
            ..TopologyConfig::default()
        };
        for l1 in (0..=3000).step_by(250) {
            for batt in (-2000..=2000).step_by(250) {
                for generator in [0.0, 400.0, 1500.0] {
                    let (l1, batt) = (l1 as f64, batt as f64);
                    let pv = derive(&topology, l1, batt, generator);
                    let charge = (-batt).max(0.0);
                    let upper = match charge_source {
                        ChargeSource::AcPv => l1 + charge,
                        ChargeSource::DcMppt => l1,
                    };
                    assert!(pv >= 0.0, "l1={} batt={} gen={}", l1, batt, generator);
                    assert!(pv <= upper, "l1={} batt={} gen={}", l1, batt, generator);
                }
            }
        }
    }
}

#[test]
fn battery_sign_is_normalised() {
    let charge_positive = TopologyConfig {
        battery_sign: BatterySign::ChargePositive,
        ..TopologyConfig::default()
    };
    let discharge_positive = TopologyConfig::default();
    for (l1, batt) in [(800.0, 300.0), (300.0, -300.0), (0.0, 50.0)] {
        assert_eq!(
            derive(&discharge_positive, l1, batt, 0.0),
            derive(&charge_positive, l1, -batt, 0.0)
        );
    }
}

#[test]
fn any_unavailable_input_gives_unavailable() {
    let d = PvAcDerivation::new(&TopologyConfig::default());
    let nan = Reading::valid(Channel::BatteryPower, f64::NAN);
    assert!(!nan.valid);
    assert_eq!(
        d.derive(&Reading::valid(Channel::InverterPower, 500.0), &nan, 0.0),
        DerivedValue::Unavailable
    );
}

#[test]
fn direct_pv_scenario() {
    let pv = derive(&TopologyConfig::default(), 900.0, 0.0, 0.0);
    assert_eq!(pv, 900.0);
    assert_eq!(
        classify_state(pv, 900.0, 0.0, Some(INVERTER_MODE_INVERT), 0.0),
        SystemState::DayPvDirect
    );
}

#[test]
fn generator_passthrough_scenario() {
    let mut detector = GeneratorDetector::new(&GeneratorConfig::default());
    assert!(detector.update(Some(1200.0), Some(INVERTER_MODE_PASSTHROUGH), 0.0));

    let pv = derive(&TopologyConfig::default(), 1600.0, -280.0, 1200.0);
    assert_eq!(pv, 680.0);
    assert_eq!(
        classify_state(pv, 1600.0, -280.0, Some(INVERTER_MODE_PASSTHROUGH), 1200.0),
        SystemState::GenPassthrough
    );
}

#[test]
fn generator_holds_for_minimum_runtime() {
    let mut detector = GeneratorDetector::new(&GeneratorConfig::default());
    assert!(detector.update(Some(900.0), Some(INVERTER_MODE_PASSTHROUGH), 1.0));
    // Dropping out early is ignored
    assert!(detector.update(Some(0.0), Some(INVERTER_MODE_INVERT), 3.0));
    assert!(detector.update(Some(0.0), Some(INVERTER_MODE_INVERT), 3.0));
    assert!(!detector.update(Some(0.0), Some(INVERTER_MODE_INVERT), 3.0));
    // Inside the hysteresis band it does not restart
    assert!(!detector.update(Some(150.0), Some(INVERTER_MODE_PASSTHROUGH), 1.0));
}

#[test]
fn generator_needs_passthrough_to_start() {
    let mut detector = GeneratorDetector::new(&GeneratorConfig::default());
    assert!(!detector.update(Some(1500.0), Some(INVERTER_MODE_INVERT), 1.0));
    // Unknown mode does not block
    assert!(detector.update(Some(1500.0), None, 1.0));
}

#[test]
fn night_and_surplus_labels() {
    assert_eq!(
        classify_state(0.0, 400.0, 400.0, Some(INVERTER_MODE_INVERT), 0.0),
        SystemState::NightBattery
    );
    assert_eq!(
        classify_state(600.0, 300.0, -300.0, Some(INVERTER_MODE_INVERT), 0.0),
        SystemState::DayPvSurplus
    );
    assert_eq!(
        classify_state(500.0, 800.0, 300.0, Some(INVERTER_MODE_INVERT), 0.0),
        SystemState::DayPvPlusBattery
    );
}
