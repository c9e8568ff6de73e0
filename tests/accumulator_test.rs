use chrono::NaiveDate;
use offgrid_bridge::accumulator::{AccumulatorState, EnergyAccumulator, ResetPolicy};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

#[test]
fn counter_never_decreases_within_a_day() {
    let mut acc = EnergyAccumulator::new(ResetPolicy::Daily);
    let samples = [
        Some(500.0),
        None,
        Some(-200.0),
        Some(f64::NAN),
        Some(1200.0),
        Some(0.0),
        Some(f64::INFINITY),
        Some(300.0),
    ];
    let mut previous = 0.0;
    for (i, sample) in samples.iter().cycle().take(200).enumerate() {
        let elapsed = if i % 7 == 0 { -1.0 } else { 1.0 + (i % 3) as f64 };
        let energy = acc.advance(day(10), *sample, elapsed);
        assert!(energy >= previous, "step {}", i);
        previous = energy;
    }
    assert!(previous > 0.0);
}

#[test]
fn forward_day_resets_backward_day_does_not() {
    let mut acc = EnergyAccumulator::from_state(
        AccumulatorState {
            energy_wh: 800.0,
            day: Some(day(10)),
            last_update: None,
        },
        ResetPolicy::Daily,
    );
    assert_eq!(acc.advance(day(10), Some(3600.0), 1.0), 801.0);
    assert_eq!(acc.advance(day(9), Some(3600.0), 1.0), 802.0);
    assert_eq!(acc.day(), Some(day(10)));

    assert_eq!(acc.advance(day(11), Some(3600.0), 1.0), 1.0);
    assert_eq!(acc.day(), Some(day(11)));
    assert!(acc.is_dirty());
}

#[test]
fn lifetime_counter_ignores_day_changes() {
    let mut acc = EnergyAccumulator::new(ResetPolicy::Never);
    acc.advance(day(1), Some(1000.0), 3600.0);
    acc.advance(day(2), Some(1000.0), 3600.0);
    assert_eq!(acc.energy_wh(), 2000.0);
    assert_eq!(acc.energy_kwh(), 2.0);
}

#[test]
fn clean_after_persist() {
    let mut acc = EnergyAccumulator::new(ResetPolicy::Never);
    assert!(!acc.is_dirty());
    acc.advance(day(1), Some(10.0), 1.0);
    assert!(acc.is_dirty());
    acc.mark_clean();
    acc.advance(day(1), None, 1.0);
    assert!(!acc.is_dirty());
}
