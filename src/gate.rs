//! Publication stability gate
//!
//! Decides, per published channel, what the sink should do with this
//! cycle's value. A channel is registered on its first valid value and is
//! never taken down again: when its input disappears the last value is
//! republished, and after `threshold` consecutive invalid cycles it is
//! flagged stale.

use serde::Serialize;

use crate::derivation::DerivedValue;

/// Lifecycle of one published channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublicationState {
    Unregistered,
    Live { value: f64 },
    Stale { value: f64 },
}

impl PublicationState {
    pub fn is_registered(&self) -> bool {
        !matches!(self, PublicationState::Unregistered)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            PublicationState::Unregistered => None,
            PublicationState::Live { value } | PublicationState::Stale { value } => Some(*value),
        }
    }
}

/// What the sink should do this cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Nothing has been published yet; do not create anything
    Hold,
    /// Create the object and publish its first value
    Register { value: f64 },
    /// Publish a fresh value
    Publish { value: f64 },
    /// Input missing; keep the last value visible
    Republish { value: f64, stale: bool },
}

impl GateDecision {
    pub fn value(&self) -> Option<f64> {
        match self {
            GateDecision::Hold => None,
            GateDecision::Register { value }
            | GateDecision::Publish { value }
            | GateDecision::Republish { value, .. } => Some(*value),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, GateDecision::Republish { stale: true, .. })
    }
}

#[derive(Debug, Clone)]
pub struct PublicationGate {
    state: PublicationState,
    invalid_count: u32,
    threshold: u32,
}

impl PublicationGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: PublicationState::Unregistered,
            invalid_count: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn state(&self) -> PublicationState {
        self.state
    }

    pub fn invalid_count(&self) -> u32 {
        self.invalid_count
    }

    pub fn observe(&mut self, derived: &DerivedValue) -> GateDecision {
        match (self.state, derived.value()) {
            (PublicationState::Unregistered, None) => GateDecision::Hold,
            (PublicationState::Unregistered, Some(value)) => {
                self.state = PublicationState::Live { value };
                self.invalid_count = 0;
                GateDecision::Register { value }
            }
            (PublicationState::Live { .. } | PublicationState::Stale { .. }, Some(value)) => {
                self.state = PublicationState::Live { value };
                self.invalid_count = 0;
                GateDecision::Publish { value }
            }
            (PublicationState::Live { value }, None) => {
                self.invalid_count = self.invalid_count.saturating_add(1);
                if self.invalid_count >= self.threshold {
                    self.state = PublicationState::Stale { value };
                    GateDecision::Republish { value, stale: true }
                } else {
                    GateDecision::Republish {
                        value,
                        stale: false,
                    }
                }
            }
            (PublicationState::Stale { value }, None) => {
                self.invalid_count = self.invalid_count.saturating_add(1);
                GateDecision::Republish { value, stale: true }
            }
        }
    }
}
