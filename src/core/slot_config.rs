#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a neuron picks the reference point for percent-distance binning.
///
/// Only `First` is supported: the anchor is the first value (or position)
/// the neuron ever sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AnchorMode {
    #[default]
    First,
}

/// Slot binning, capacity and growth knobs shared by every neuron of a layer.
///
/// Effectively immutable once a layer is built; layers and neurons hold it
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SlotConfig {
    pub anchor_mode: AnchorMode,

    // ─────────────────────────────────────────────────────────────────────────
    // Binning
    // ─────────────────────────────────────────────────────────────────────────
    /// Scalar bin width, in percent of the anchor magnitude.
    pub bin_width_percent: f64,
    /// Floor for the scalar denominator when the anchor is near zero.
    pub epsilon_scale: f64,
    pub row_bin_width_percent: f64,
    pub col_bin_width_percent: f64,

    // ─────────────────────────────────────────────────────────────────────────
    // Capacity
    // ─────────────────────────────────────────────────────────────────────────
    /// Maximum slots per neuron; -1 means unlimited.
    pub slot_limit: i64,

    // ─────────────────────────────────────────────────────────────────────────
    // Growth
    // ─────────────────────────────────────────────────────────────────────────
    pub growth_enabled: bool,
    pub neuron_growth_enabled: bool,
    pub layer_growth_enabled: bool,
    /// Consecutive fallback hits needed before a neuron requests growth.
    pub fallback_growth_threshold: u32,
    pub neuron_growth_cooldown_ticks: i64,
    /// Neuron cap applied to new layers; -1 means unlimited.
    pub layer_neuron_limit_default: i64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::fixed(5.0)
    }
}

impl SlotConfig {
    /// Fixed-width binning with `delta_percent` wide bins on every axis.
    pub fn fixed(delta_percent: f64) -> Self {
        Self {
            anchor_mode: AnchorMode::First,
            bin_width_percent: delta_percent,
            epsilon_scale: 1e-9,
            row_bin_width_percent: delta_percent,
            col_bin_width_percent: delta_percent,
            slot_limit: -1,
            growth_enabled: true,
            neuron_growth_enabled: true,
            layer_growth_enabled: true,
            fallback_growth_threshold: 3,
            neuron_growth_cooldown_ticks: 100,
            layer_neuron_limit_default: 1024,
        }
    }

    pub fn with_slot_limit(mut self, limit: i64) -> Self {
        self.slot_limit = limit;
        self
    }

    pub fn with_spatial_bins(mut self, row_percent: f64, col_percent: f64) -> Self {
        self.row_bin_width_percent = row_percent;
        self.col_bin_width_percent = col_percent;
        self
    }

    pub fn with_growth(mut self, enabled: bool) -> Self {
        self.growth_enabled = enabled;
        self
    }

    /// Whether layers using this config may donate to region layer growth.
    pub fn with_layer_growth(mut self, enabled: bool) -> Self {
        self.layer_growth_enabled = enabled;
        self
    }

    pub fn with_fallback_growth_threshold(mut self, threshold: u32) -> Self {
        self.fallback_growth_threshold = threshold;
        self
    }

    pub fn with_neuron_growth_cooldown(mut self, ticks: i64) -> Self {
        self.neuron_growth_cooldown_ticks = ticks;
        self
    }

    pub fn with_layer_neuron_limit(mut self, limit: i64) -> Self {
        self.layer_neuron_limit_default = limit;
        self
    }

    /// True when neurons of a layer using this config may trigger growth.
    #[inline]
    pub fn neuron_growth_active(&self) -> bool {
        self.growth_enabled && self.neuron_growth_enabled
    }

    /// True when a layer using this config may feed a new spillover layer.
    #[inline]
    pub fn layer_growth_active(&self) -> bool {
        self.growth_enabled && self.layer_growth_enabled
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.bin_width_percent.is_finite() || self.bin_width_percent <= 0.0 {
            return Err("bin_width_percent must be finite and > 0");
        }
        if !self.row_bin_width_percent.is_finite() || self.row_bin_width_percent <= 0.0 {
            return Err("row_bin_width_percent must be finite and > 0");
        }
        if !self.col_bin_width_percent.is_finite() || self.col_bin_width_percent <= 0.0 {
            return Err("col_bin_width_percent must be finite and > 0");
        }
        if !self.epsilon_scale.is_finite() || self.epsilon_scale <= 0.0 {
            return Err("epsilon_scale must be finite and > 0");
        }
        if self.slot_limit < -1 {
            return Err("slot_limit must be -1 (unlimited) or >= 0");
        }
        if self.layer_neuron_limit_default < -1 {
            return Err("layer_neuron_limit_default must be -1 (unlimited) or >= 0");
        }
        if self.neuron_growth_cooldown_ticks < 0 {
            return Err("neuron_growth_cooldown_ticks must be >= 0");
        }
        Ok(())
    }
}
