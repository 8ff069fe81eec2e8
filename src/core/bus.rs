#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default per-tick inhibition decay.
pub const DEFAULT_INHIBITION_DECAY: f64 = 0.9;

/// Layer-local shared state: modulation scales every input amplitude,
/// inhibition decays each tick.
///
/// Neurons only read the bus; the owning layer calls [`LateralBus::decay`]
/// once at the end of every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LateralBus {
    inhibition_factor: f64,
    modulation_factor: f64,
    current_step: i64,
    inhibition_decay: f64,
}

impl Default for LateralBus {
    fn default() -> Self {
        Self::new(DEFAULT_INHIBITION_DECAY)
    }
}

impl LateralBus {
    pub fn new(inhibition_decay: f64) -> Self {
        Self {
            inhibition_factor: 1.0,
            modulation_factor: 1.0,
            current_step: 0,
            inhibition_decay,
        }
    }

    #[inline]
    pub fn inhibition_factor(&self) -> f64 {
        self.inhibition_factor
    }

    #[inline]
    pub fn modulation_factor(&self) -> f64 {
        self.modulation_factor
    }

    #[inline]
    pub fn current_step(&self) -> i64 {
        self.current_step
    }

    #[inline]
    pub fn inhibition_decay(&self) -> f64 {
        self.inhibition_decay
    }

    pub fn set_inhibition_factor(&mut self, factor: f64) {
        self.inhibition_factor = factor;
    }

    pub fn set_modulation_factor(&mut self, factor: f64) {
        self.modulation_factor = factor;
    }

    /// End-of-tick housekeeping: inhibition decays, modulation returns to
    /// neutral and the step counter advances.
    pub fn decay(&mut self) {
        self.inhibition_factor *= self.inhibition_decay;
        self.modulation_factor = 1.0;
        self.current_step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_resets_modulation_and_advances_step() {
        let mut bus = LateralBus::new(0.9);
        bus.set_inhibition_factor(0.7);
        bus.set_modulation_factor(1.5);

        bus.decay();

        assert!((bus.inhibition_factor() - 0.63).abs() < 1e-12);
        assert_eq!(bus.modulation_factor(), 1.0);
        assert_eq!(bus.current_step(), 1);
    }

    #[test]
    fn default_bus_is_neutral() {
        let bus = LateralBus::default();
        assert_eq!(bus.inhibition_factor(), 1.0);
        assert_eq!(bus.modulation_factor(), 1.0);
        assert_eq!(bus.current_step(), 0);
        assert_eq!(bus.inhibition_decay(), DEFAULT_INHIBITION_DECAY);
    }
}
