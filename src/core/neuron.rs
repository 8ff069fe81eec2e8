use std::sync::Arc;

use hashbrown::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bus::LateralBus;
use crate::slot_config::SlotConfig;
use crate::weight::Weight;

/// Integer bin key identifying a slot.
pub type SlotKey = i64;

/// Row bins are packed above column bins: `row_bin * 1_000_000 + col_bin`.
///
/// Slot keys must stay stable across implementations, so this packing is
/// part of the contract.
pub const SPATIAL_KEY_STRIDE: i64 = 1_000_000;

/// Spatial percent-distance floor. Cell coordinates are integers, so an anchor
/// at row/col 0 is measured against one cell instead of an epsilon.
const SPATIAL_DENOM_FLOOR: f64 = 1.0;

/// Floor applied to bin widths before dividing.
const MIN_BIN_WIDTH: f64 = 1e-12;

/// An outgoing edge, addressed by arena indices rather than by reference.
///
/// `feedback` is recorded for future directional logic; delivery treats
/// feedback edges exactly like forward ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Synapse {
    pub target_layer: usize,
    pub target_neuron: usize,
    pub feedback: bool,
}

/// A slot-engine neuron.
///
/// Each input is binned by its percent distance from the first value (or
/// position) the neuron saw. Bins map to [`Weight`] slots; once the slot
/// limit is reached, unseen bins fall back to the smallest existing key and
/// the fallback streak grows. Layers read that streak to decide when to grow.
#[derive(Debug, Clone)]
pub struct Neuron {
    id: String,
    slots: HashMap<SlotKey, Weight>,
    slot_limit: i64,
    config: Arc<SlotConfig>,

    focus_anchor: Option<f64>,
    spatial_anchor: Option<(i64, i64)>,

    fired_last: bool,
    last_slot_used_fallback: bool,
    fallback_streak: u32,
    last_growth_tick: i64,
    last_selected_key: Option<SlotKey>,
    prefer_last_slot_once: bool,

    outgoing: Vec<Synapse>,
    accumulated_amplitude: f64,
    propagated_this_tick: bool,
}

impl Neuron {
    pub fn new(id: impl Into<String>, config: Arc<SlotConfig>) -> Self {
        Self {
            id: id.into(),
            slots: HashMap::new(),
            slot_limit: config.slot_limit,
            config,
            focus_anchor: None,
            spatial_anchor: None,
            fired_last: false,
            last_slot_used_fallback: false,
            fallback_streak: 0,
            last_growth_tick: -1,
            last_selected_key: None,
            prefer_last_slot_once: false,
            outgoing: Vec::new(),
            accumulated_amplitude: 0.0,
            propagated_this_tick: false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slots(&self) -> &HashMap<SlotKey, Weight> {
        &self.slots
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, key: SlotKey) -> Option<&Weight> {
        self.slots.get(&key)
    }

    #[inline]
    pub fn slot_limit(&self) -> i64 {
        self.slot_limit
    }

    pub fn set_slot_limit(&mut self, limit: i64) {
        self.slot_limit = limit;
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    pub fn focus_anchor(&self) -> Option<f64> {
        self.focus_anchor
    }

    pub fn spatial_anchor(&self) -> Option<(i64, i64)> {
        self.spatial_anchor
    }

    #[inline]
    pub fn fired_last(&self) -> bool {
        self.fired_last
    }

    #[inline]
    pub fn last_slot_used_fallback(&self) -> bool {
        self.last_slot_used_fallback
    }

    #[inline]
    pub fn fallback_streak(&self) -> u32 {
        self.fallback_streak
    }

    #[inline]
    pub fn last_growth_tick(&self) -> i64 {
        self.last_growth_tick
    }

    pub fn set_last_growth_tick(&mut self, step: i64) {
        self.last_growth_tick = step;
    }

    pub fn last_selected_key(&self) -> Option<SlotKey> {
        self.last_selected_key
    }

    #[inline]
    pub fn accumulated_amplitude(&self) -> f64 {
        self.accumulated_amplitude
    }

    pub fn outgoing(&self) -> &[Synapse] {
        &self.outgoing
    }

    #[inline]
    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    /// `slot_limit >= 0` and every allowed slot exists.
    #[inline]
    pub fn is_at_capacity(&self) -> bool {
        self.slot_limit >= 0 && self.slots.len() as i64 >= self.slot_limit
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activation
    // ─────────────────────────────────────────────────────────────────────────

    /// Scalar input path. Returns whether the selected slot fired.
    pub fn on_input(&mut self, value: f64, bus: &LateralBus) -> bool {
        let anchor = *self.focus_anchor.get_or_insert(value);
        let denom = self.config.epsilon_scale.max(anchor.abs());
        let key = percent_bin(value - anchor, denom, self.config.bin_width_percent);
        self.activate(key, value, bus)
    }

    /// Spatial input path: the slot key packs independent row/col bins.
    pub fn on_input_2d(&mut self, value: f64, row: usize, col: usize, bus: &LateralBus) -> bool {
        let (row, col) = (row as i64, col as i64);
        let (anchor_row, anchor_col) = *self.spatial_anchor.get_or_insert((row, col));

        let row_bin = percent_bin(
            (row - anchor_row) as f64,
            SPATIAL_DENOM_FLOOR.max(anchor_row.abs() as f64),
            self.config.row_bin_width_percent,
        );
        let col_bin = percent_bin(
            (col - anchor_col) as f64,
            SPATIAL_DENOM_FLOOR.max(anchor_col.abs() as f64),
            self.config.col_bin_width_percent,
        );
        let key = row_bin
            .saturating_mul(SPATIAL_KEY_STRIDE)
            .saturating_add(col_bin);
        self.activate(key, value, bus)
    }

    fn activate(&mut self, key: SlotKey, value: f64, bus: &LateralBus) -> bool {
        let chosen = match self.take_preferred_key() {
            Some(preferred) => {
                self.last_slot_used_fallback = false;
                self.fallback_streak = 0;
                preferred
            }
            None => self.select_or_create_slot(key),
        };

        let modulation = bus.modulation_factor();
        let weight = self.slots.entry(chosen).or_default();
        weight.reinforce(modulation);
        let fired = weight.update_threshold(value * modulation);

        self.last_selected_key = Some(chosen);
        self.fired_last = fired;
        self.accumulated_amplitude += value;
        fired
    }

    /// One-shot reuse of the last selected slot after an unfreeze.
    fn take_preferred_key(&mut self) -> Option<SlotKey> {
        if !self.prefer_last_slot_once {
            return None;
        }
        self.prefer_last_slot_once = false;
        self.last_selected_key
            .filter(|key| self.slots.contains_key(key))
    }

    /// Exact hit reuses, a miss under capacity creates, a miss at capacity
    /// falls back to the smallest existing key.
    fn select_or_create_slot(&mut self, key: SlotKey) -> SlotKey {
        if self.slots.contains_key(&key) {
            self.last_slot_used_fallback = false;
            self.fallback_streak = 0;
            return key;
        }

        if self.is_at_capacity() {
            if let Some(&smallest) = self.slots.keys().min() {
                self.last_slot_used_fallback = true;
                self.fallback_streak = self.fallback_streak.saturating_add(1);
                return smallest;
            }
            // Empty map at capacity (slot_limit == 0): create instead of failing.
        }

        self.slots.insert(key, Weight::new());
        self.last_slot_used_fallback = false;
        self.fallback_streak = 0;
        key
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Freeze control
    // ─────────────────────────────────────────────────────────────────────────

    fn last_slot_key(&self) -> Option<SlotKey> {
        self.last_selected_key
            .filter(|key| self.slots.contains_key(key))
            .or_else(|| self.slots.keys().min().copied())
    }

    /// Freeze the last selected slot (or the smallest one). Returns false when
    /// the neuron has no slots yet.
    pub fn freeze_last_slot(&mut self) -> bool {
        let Some(key) = self.last_slot_key() else {
            return false;
        };
        if let Some(weight) = self.slots.get_mut(&key) {
            weight.freeze();
        }
        true
    }

    /// Unfreeze the last selected slot and make the next input reuse it.
    pub fn unfreeze_last_slot(&mut self) -> bool {
        let Some(key) = self.last_slot_key() else {
            return false;
        };
        if let Some(weight) = self.slots.get_mut(&key) {
            weight.unfreeze();
        }
        self.last_selected_key = Some(key);
        self.prefer_last_slot_once = true;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wiring and tick bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    pub fn connect(&mut self, target_layer: usize, target_neuron: usize, feedback: bool) {
        self.outgoing.push(Synapse {
            target_layer,
            target_neuron,
            feedback,
        });
    }

    pub fn is_connected_to(&self, target_layer: usize, target_neuron: usize) -> bool {
        self.outgoing
            .iter()
            .any(|s| s.target_layer == target_layer && s.target_neuron == target_neuron)
    }

    /// Claims this tick's propagation turn. Returns false if the neuron
    /// already delivered its output this tick.
    pub(crate) fn claim_propagation(&mut self) -> bool {
        !std::mem::replace(&mut self.propagated_this_tick, true)
    }

    pub fn reset_accumulated_amplitude(&mut self) {
        self.accumulated_amplitude = 0.0;
        self.propagated_this_tick = false;
    }

    /// Fallback pressure is high enough to ask the layer for a new neuron.
    pub fn growth_ready(&self, current_step: i64) -> bool {
        let cooldown_ok = self.last_growth_tick < 0
            || current_step - self.last_growth_tick >= self.config.neuron_growth_cooldown_ticks;
        self.is_at_capacity()
            && self.last_slot_used_fallback
            && self.fallback_streak >= self.config.fallback_growth_threshold
            && cooldown_ok
    }
}

/// `floor(|delta| / denom * 100 / width)` as a saturating integer bin.
fn percent_bin(delta: f64, denom: f64, width_percent: f64) -> SlotKey {
    let pct = delta.abs() / denom * 100.0;
    (pct / width_percent.max(MIN_BIN_WIDTH)).floor() as SlotKey
}
