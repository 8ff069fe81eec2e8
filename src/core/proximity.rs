//! Distance-based autowiring.
//!
//! Neurons are placed at deterministic 3D positions (one z-plane per layer)
//! and bucketed into a [`SpatialHash`] whose cell size equals the connection
//! radius. [`apply`] then walks sources in `(layer, neuron)` order and
//! connects them to nearby neurons under a step, linear or logistic
//! probability profile.

use hashbrown::HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layer::{Layer, LayerId};
use crate::rng::Lcg;

/// Distance between layer planes.
pub const LAYER_SPACING: f64 = 4.0;
/// Distance between neighbouring cells within a layer.
pub const GRID_SPACING: f64 = 1.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ProximityFunction {
    /// Connect everything within the radius.
    #[default]
    Step,
    /// `(1 - d/r)^gamma`
    Linear,
    /// `1 / (1 + exp(k (d - r)))`
    Logistic,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ProximityConfig {
    pub enabled: bool,
    pub radius: f64,
    pub function: ProximityFunction,
    pub linear_exponent_gamma: f64,
    pub logistic_steepness_k: f64,
    pub max_edges_per_tick: usize,
    /// Ticks a neuron waits between attempts, as source or as target.
    pub cooldown_ticks: i64,
    pub development_window_start: i64,
    pub development_window_end: i64,
    /// Layers to consider; empty means every layer.
    pub candidate_layers: Vec<LayerId>,
    pub record_mesh_rules_on_cross_layer: bool,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 1.0,
            function: ProximityFunction::Step,
            linear_exponent_gamma: 1.0,
            logistic_steepness_k: 4.0,
            max_edges_per_tick: 128,
            cooldown_ticks: 5,
            development_window_start: 0,
            development_window_end: i64::MAX,
            candidate_layers: Vec::new(),
            record_mesh_rules_on_cross_layer: true,
        }
    }
}

impl ProximityConfig {
    /// Enabled step-profile config with the given radius.
    pub fn step(radius: f64) -> Self {
        Self {
            enabled: true,
            radius,
            ..Self::default()
        }
    }

    pub fn with_function(mut self, function: ProximityFunction) -> Self {
        self.function = function;
        self
    }

    pub fn with_candidate_layers(mut self, layers: Vec<LayerId>) -> Self {
        self.candidate_layers = layers;
        self
    }

    pub fn with_max_edges_per_tick(mut self, max_edges: usize) -> Self {
        self.max_edges_per_tick = max_edges;
        self
    }

    pub fn with_cooldown(mut self, ticks: i64) -> Self {
        self.cooldown_ticks = ticks;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err("radius must be finite and > 0");
        }
        if self.cooldown_ticks < 0 {
            return Err("cooldown_ticks must be >= 0");
        }
        if self.development_window_end < self.development_window_start {
            return Err("development window end precedes its start");
        }
        Ok(())
    }

    /// Connection probability at distance `d` (already known to be within
    /// the radius).
    pub fn probability(&self, d: f64) -> f64 {
        match self.function {
            ProximityFunction::Step => {
                if d <= self.radius {
                    1.0
                } else {
                    0.0
                }
            }
            ProximityFunction::Linear => {
                let normalized = (1.0 - d / self.radius.max(1e-12)).max(0.0);
                normalized.powf(self.linear_exponent_gamma.max(1e-12))
            }
            ProximityFunction::Logistic => {
                1.0 / (1.0 + (self.logistic_steepness_k * (d - self.radius)).exp())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Layout and spatial hash
// ─────────────────────────────────────────────────────────────────────────

pub type Position = (f64, f64, f64);

/// Deterministic neuron placement.
///
/// 2D layers use their own grid. Other layers place neuron `i` on the
/// smallest square grid holding `i + 1` cells, so a position never moves as
/// the layer grows. Both are centred on the layer's z-plane.
pub fn layout_position(layer_index: LayerId, neuron_index: usize, shape: Option<(usize, usize)>) -> Position {
    let (height, width) = match shape {
        Some((h, w)) if h > 0 && w > 0 => (h, w),
        _ => {
            let side = ceil_sqrt(neuron_index + 1);
            (side, side)
        }
    };
    let row = (neuron_index / width) as f64;
    let col = (neuron_index % width) as f64;
    let x = (col - (width as f64 - 1.0) / 2.0) * GRID_SPACING;
    let y = ((height as f64 - 1.0) / 2.0 - row) * GRID_SPACING;
    let z = layer_index as f64 * LAYER_SPACING;
    (x, y, z)
}

fn ceil_sqrt(n: usize) -> usize {
    let mut side = (n as f64).sqrt() as usize;
    while side * side < n {
        side += 1;
    }
    side
}

type CellKey = (i64, i64, i64);

/// Uniform 3D grid of `(layer, neuron)` entries.
#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<(LayerId, usize)>>,
}

impl SpatialHash {
    /// `cell_size` must be positive; callers validate it first.
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    fn key_for(&self, p: Position) -> CellKey {
        (
            (p.0 / self.cell_size).floor() as i64,
            (p.1 / self.cell_size).floor() as i64,
            (p.2 / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, item: (LayerId, usize), position: Position) {
        let key = self.key_for(position);
        self.cells.entry(key).or_default().push(item);
    }

    /// Entries in the 27 cells around `position`, in a fixed cell order and
    /// insertion order within each cell.
    pub fn near(&self, position: Position) -> Vec<(LayerId, usize)> {
        let (bx, by, bz) = self.key_for(position);
        let mut out = Vec::new();
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if let Some(bucket) = self.cells.get(&(bx + dx, by + dy, bz + dz)) {
                        out.extend_from_slice(bucket);
                    }
                }
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Apply
// ─────────────────────────────────────────────────────────────────────────

/// Per-region attempt bookkeeping, keyed by `(layer, neuron)`.
#[derive(Debug, Clone, Default)]
pub struct ProximityState {
    last_attempt: HashMap<(LayerId, usize), i64>,
}

impl ProximityState {
    pub fn last_attempt(&self, layer: LayerId, neuron: usize) -> Option<i64> {
        self.last_attempt.get(&(layer, neuron)).copied()
    }

    fn cooling_down(&self, key: (LayerId, usize), step: i64, cooldown: i64) -> bool {
        self.last_attempt
            .get(&key)
            .is_some_and(|&last| step.saturating_sub(last) < cooldown)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProximityOutcome {
    pub edges_added: usize,
    /// Distinct `(source, dest)` layer pairs that gained a cross-layer edge,
    /// in first-seen order.
    pub cross_layer_pairs: Vec<(LayerId, LayerId)>,
}

/// One proximity pass at `step`.
///
/// Probabilistic profiles draw from `rng`; existing edges are never
/// duplicated and the pass stops once `max_edges_per_tick` edges were added.
pub fn apply(
    cfg: &ProximityConfig,
    step: i64,
    layers: &mut [Layer],
    rng: &mut Lcg,
    state: &mut ProximityState,
) -> ProximityOutcome {
    let mut outcome = ProximityOutcome::default();
    if !cfg.enabled || step < cfg.development_window_start || step > cfg.development_window_end {
        return outcome;
    }
    if let Err(reason) = cfg.validate() {
        debug!(reason, "proximity pass skipped");
        return outcome;
    }

    let candidates: Vec<LayerId> = if cfg.candidate_layers.is_empty() {
        (0..layers.len()).collect()
    } else {
        cfg.candidate_layers
            .iter()
            .copied()
            .filter(|&id| id < layers.len())
            .collect()
    };
    if candidates.is_empty() {
        return outcome;
    }

    let mut grid = SpatialHash::new(cfg.radius);
    for &layer_id in &candidates {
        let shape = layers[layer_id].shape();
        for neuron in 0..layers[layer_id].len() {
            grid.insert((layer_id, neuron), layout_position(layer_id, neuron, shape));
        }
    }

    for &layer_id in &candidates {
        let shape = layers[layer_id].shape();
        for neuron in 0..layers[layer_id].len() {
            if state.cooling_down((layer_id, neuron), step, cfg.cooldown_ticks) {
                continue;
            }
            state.last_attempt.insert((layer_id, neuron), step);

            let origin = layout_position(layer_id, neuron, shape);
            for (target_layer, target_neuron) in grid.near(origin) {
                if (target_layer, target_neuron) == (layer_id, neuron) {
                    continue;
                }
                if layers[layer_id].neurons()[neuron].is_connected_to(target_layer, target_neuron) {
                    continue;
                }
                let target = layout_position(target_layer, target_neuron, layers[target_layer].shape());
                let d = distance(origin, target);
                if d > cfg.radius {
                    continue;
                }
                let p = cfg.probability(d);
                if p < 1.0 && rng.next_f64() >= p {
                    continue;
                }

                if let Some(source) = layers[layer_id].neuron_mut(neuron) {
                    source.connect(target_layer, target_neuron, false);
                }
                if target_layer != layer_id
                    && cfg.record_mesh_rules_on_cross_layer
                    && !outcome.cross_layer_pairs.contains(&(layer_id, target_layer))
                {
                    outcome.cross_layer_pairs.push((layer_id, target_layer));
                }
                state.last_attempt.insert((target_layer, target_neuron), step);
                outcome.edges_added += 1;
                if outcome.edges_added >= cfg.max_edges_per_tick {
                    return outcome;
                }
            }
        }
    }
    outcome
}

fn distance(a: Position, b: Position) -> f64 {
    let (dx, dy, dz) = (a.0 - b.0, a.1 - b.1, a.2 - b.2);
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::slot_config::SlotConfig;

    fn generic(id: LayerId, neurons: usize) -> Layer {
        let mut layer = Layer::generic(id, format!("L{id}"), Arc::new(SlotConfig::default()));
        layer.add_neurons(neurons);
        layer
    }

    #[test]
    fn layout_is_centred_per_layer() {
        assert_eq!(layout_position(0, 0, Some((1, 1))), (0.0, 0.0, 0.0));
        let (x, y, z) = layout_position(2, 0, Some((2, 2)));
        assert!((x + 0.6).abs() < 1e-12 && (y - 0.6).abs() < 1e-12);
        assert_eq!(z, 2.0 * LAYER_SPACING);

        // Generic layer: neuron 3 sits on a 2x2 grid.
        let (x, y, _) = layout_position(0, 3, None);
        assert!((x - 0.6).abs() < 1e-12 && (y + 0.6).abs() < 1e-12);
    }

    #[test]
    fn spatial_hash_finds_neighbouring_cells_only() {
        let mut grid = SpatialHash::new(1.0);
        grid.insert((0, 0), (0.0, 0.0, 0.0));
        grid.insert((0, 1), (1.5, 0.0, 0.0));
        grid.insert((0, 2), (5.0, 0.0, 0.0));
        assert_eq!(grid.near((0.2, 0.2, 0.2)), vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn probability_profiles() {
        let step = ProximityConfig::step(2.0);
        assert_eq!(step.probability(2.0), 1.0);
        let linear = step.clone().with_function(ProximityFunction::Linear);
        assert!((linear.probability(1.0) - 0.5).abs() < 1e-12);
        let logistic = step.with_function(ProximityFunction::Logistic);
        assert!((logistic.probability(2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn step_profile_connects_within_radius_without_duplicates() {
        // Generic positions: n0 (0,0), n1 (0.6,0.6), n2 (-0.6,-0.6), n3 (0.6,-0.6).
        let mut layers = vec![generic(0, 4)];
        let mut rng = Lcg::new(1234);
        let mut state = ProximityState::default();
        let cfg = ProximityConfig::step(1.25).with_cooldown(0);

        let first = apply(&cfg, 0, &mut layers, &mut rng, &mut state);
        // Every pair except n1-n2 (1.70 apart), in both directions.
        assert_eq!(first.edges_added, 10);
        assert!(!layers[0].neurons()[1].is_connected_to(0, 2));
        assert!(first.cross_layer_pairs.is_empty());

        let second = apply(&cfg, 1, &mut layers, &mut rng, &mut state);
        assert_eq!(second.edges_added, 0, "existing edges are not duplicated");
    }

    #[test]
    fn cooldown_and_window_gate_attempts() {
        let mut layers = vec![generic(0, 4)];
        let mut rng = Lcg::new(1);
        let mut state = ProximityState::default();
        let cfg = ProximityConfig {
            development_window_start: 10,
            ..ProximityConfig::step(1.25).with_cooldown(5)
        };

        assert_eq!(apply(&cfg, 3, &mut layers, &mut rng, &mut state).edges_added, 0);
        assert!(apply(&cfg, 10, &mut layers, &mut rng, &mut state).edges_added > 0);
        assert_eq!(state.last_attempt(0, 0), Some(10));
    }

    #[test]
    fn edge_cap_and_cross_layer_pairs() {
        let mut layers = vec![generic(0, 1), generic(1, 1)];
        let mut rng = Lcg::new(1);
        let mut state = ProximityState::default();
        // Planes are 4.0 apart; a radius of 4.0 links the two single neurons.
        let cfg = ProximityConfig::step(4.0).with_max_edges_per_tick(1);

        let outcome = apply(&cfg, 0, &mut layers, &mut rng, &mut state);
        assert_eq!(outcome.edges_added, 1);
        assert_eq!(outcome.cross_layer_pairs, vec![(0, 1)]);
        assert!(layers[0].neurons()[0].is_connected_to(1, 0));
    }

    #[test]
    fn disabled_or_invalid_configs_do_nothing() {
        let mut layers = vec![generic(0, 4)];
        let mut rng = Lcg::new(1);
        let mut state = ProximityState::default();

        let disabled = ProximityConfig::default();
        assert_eq!(apply(&disabled, 0, &mut layers, &mut rng, &mut state).edges_added, 0);

        let zero_radius = ProximityConfig::step(0.0);
        assert!(zero_radius.validate().is_err());
        assert_eq!(apply(&zero_radius, 0, &mut layers, &mut rng, &mut state).edges_added, 0);
    }
}
