#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-step reinforcement applied to `strength`, scaled by the bus modulation.
pub const REINFORCE_STEP: f64 = 0.001;

/// EMA factor for the adaptive threshold.
const THRESHOLD_BETA: f64 = 0.1;

/// Threshold drift applied when a slot does not fire.
const THRESHOLD_RELAX: f64 = 0.99;

/// One slot's synaptic state: a bounded strength plus a self-calibrating
/// firing threshold.
///
/// A frozen weight never changes. `reinforce` is a no-op and
/// `update_threshold` reports `false` without touching the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Weight {
    strength: f64,
    threshold: f64,
    frozen: bool,
}

impl Weight {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn strength(&self) -> f64 {
        self.strength
    }

    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Nudge strength by `0.001 * modulation`, clamped to [-1, 1].
    pub fn reinforce(&mut self, modulation: f64) {
        if self.frozen {
            return;
        }
        self.strength = (self.strength + REINFORCE_STEP * modulation).clamp(-1.0, 1.0);
    }

    /// Compare `effective_input + strength` against the threshold and move the
    /// threshold toward the observed drive (or let it relax when silent).
    ///
    /// Returns whether the slot fired.
    pub fn update_threshold(&mut self, effective_input: f64) -> bool {
        if self.frozen {
            return false;
        }
        let drive = effective_input + self.strength;
        let fired = drive > self.threshold;
        let target = if fired {
            drive
        } else {
            self.threshold * THRESHOLD_RELAX
        };
        self.threshold = (1.0 - THRESHOLD_BETA) * self.threshold + THRESHOLD_BETA * target;
        fired
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinforce_is_clamped_to_unit_interval() {
        let mut w = Weight::new();
        for _ in 0..5000 {
            w.reinforce(1.0);
        }
        assert_eq!(w.strength(), 1.0);

        for _ in 0..5000 {
            w.reinforce(-3.0);
        }
        assert_eq!(w.strength(), -1.0);
    }

    #[test]
    fn threshold_tracks_drive_when_firing() {
        let mut w = Weight::new();
        assert!(w.update_threshold(1.0), "fresh slot fires on positive input");
        assert!((w.threshold() - 0.1).abs() < 1e-12);

        // Silence relaxes the threshold toward zero.
        let before = w.threshold();
        assert!(!w.update_threshold(-10.0));
        assert!(w.threshold() < before);
    }

    #[test]
    fn frozen_weight_is_inert() {
        let mut w = Weight::new();
        w.reinforce(1.0);
        w.update_threshold(0.5);
        let (s, t) = (w.strength(), w.threshold());

        w.freeze();
        w.reinforce(100.0);
        assert!(!w.update_threshold(1_000.0), "frozen slots never fire");
        assert_eq!(w.strength(), s);
        assert_eq!(w.threshold(), t);

        // Freezing twice is harmless.
        w.freeze();
        assert!(w.is_frozen());

        w.unfreeze();
        assert!(w.update_threshold(1_000.0));
    }
}
