use offgrid_bridge::derivation::DerivedValue;
use offgrid_bridge::gate::{GateDecision, PublicationGate, PublicationState};

/// Deterministic pseudo-random validity pattern
fn pattern(seed: u64, len: usize) -> Vec<bool> {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (x >> 33) % 3 != 0
        })
        .collect()
}

#[test]
fn registered_output_is_never_dropped() {
    for seed in 0..50 {
        let mut gate = PublicationGate::new(4);
        let mut registered = false;
        let mut last_value = None;
        for (i, valid) in pattern(seed, 300).into_iter().enumerate() {
            let input = if valid {
                DerivedValue::Available(i as f64)
            } else {
                DerivedValue::Unavailable
            };
            let decision = gate.observe(&input);
            if registered {
                assert_ne!(decision, GateDecision::Hold);
                assert!(gate.state().is_registered());
            }
            if let GateDecision::Register { .. } = decision {
                assert!(!registered);
                registered = true;
            }
            if !valid && registered {
                // The last good value stays visible
                assert_eq!(decision.value(), last_value);
            }
            if valid {
                last_value = Some(i as f64);
            }
        }
    }
}

#[test]
fn stale_exactly_at_threshold() {
    let mut gate = PublicationGate::new(5);
    gate.observe(&DerivedValue::Available(620.0));
    let flags: Vec<bool> = (0..10)
        .map(|_| gate.observe(&DerivedValue::Unavailable).is_stale())
        .collect();
    assert_eq!(
        flags,
        [false, false, false, false, true, true, true, true, true, true]
    );
    assert_eq!(gate.state(), PublicationState::Stale { value: 620.0 });
    assert_eq!(gate.invalid_count(), 10);
}
