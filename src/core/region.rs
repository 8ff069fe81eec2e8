//! Region: the layer arena, its wiring and the per-tick protocol.
//!
//! A tick resolves the input tensor, delivers active cells to the layers
//! bound to the port, propagates fired neurons through their outgoing edges,
//! scans output layers for spatial statistics, runs per-layer end-of-tick
//! growth and finally checks region-level layer growth.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{GrowNetError, Result};
use crate::layer::{Layer, LayerId, LayerKind};
use crate::metrics::{spatial_metrics, ImageRef, RegionMetrics, SpatialStats};
use crate::pal::{self, ParallelOptions};
use crate::proximity::{self, ProximityConfig, ProximityState};
use crate::rng::Lcg;
use crate::slot_config::SlotConfig;
use crate::topographic::{self, Padding, TopographicConfig, TopographicMap, WindowSpec};
use crate::tract::Tract;

/// Seed of the region wiring stream unless one is given.
pub const DEFAULT_SEED: u64 = 1234;

/// Gain and firing floor of input layers created on first use of a port.
const AUTO_INPUT_GAIN: f64 = 1.0;
const AUTO_INPUT_EPSILON: f64 = 0.01;

// ─────────────────────────────────────────────────────────────────────────
// Configuration and value types
// ─────────────────────────────────────────────────────────────────────────

/// A recorded probabilistic projection, replayed for neurons grown later.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeshRule {
    pub src: LayerId,
    pub dst: LayerId,
    pub probability: f64,
    pub feedback: bool,
}

/// Knobs for region-level layer growth.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct GrowthPolicy {
    pub enable_layer_growth: bool,
    /// Cap on the total layer count; values <= 0 mean unlimited.
    pub max_layers: i64,
    pub avg_slots_threshold: f64,
    pub percent_neurons_at_capacity_threshold: Option<f64>,
    pub layer_cooldown_ticks: i64,
    /// Reseeds the region wiring stream when the policy is installed.
    pub rng_seed: u64,
    pub new_layer_neuron_count: usize,
    pub wire_probability: f64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            enable_layer_growth: true,
            max_layers: -1,
            avg_slots_threshold: 8.0,
            percent_neurons_at_capacity_threshold: Some(50.0),
            layer_cooldown_ticks: 25,
            rng_seed: DEFAULT_SEED,
            new_layer_neuron_count: 4,
            wire_probability: 1.0,
        }
    }
}

impl GrowthPolicy {
    pub fn with_max_layers(mut self, max_layers: i64) -> Self {
        self.max_layers = max_layers;
        self
    }

    pub fn with_avg_slots_threshold(mut self, threshold: f64) -> Self {
        self.avg_slots_threshold = threshold;
        self
    }

    pub fn with_percent_threshold(mut self, threshold: Option<f64>) -> Self {
        self.percent_neurons_at_capacity_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, ticks: i64) -> Self {
        self.layer_cooldown_ticks = ticks;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if !self.avg_slots_threshold.is_finite() || self.avg_slots_threshold < 0.0 {
            return Err("avg_slots_threshold must be finite and >= 0");
        }
        if let Some(pct) = self.percent_neurons_at_capacity_threshold {
            if !(0.0..=100.0).contains(&pct) {
                return Err("percent_neurons_at_capacity_threshold must be in [0, 100]");
            }
        }
        if self.layer_cooldown_ticks < 0 {
            return Err("layer_cooldown_ticks must be >= 0");
        }
        if self.new_layer_neuron_count == 0 {
            return Err("new_layer_neuron_count must be > 0");
        }
        if !(0.0..=1.0).contains(&self.wire_probability) {
            return Err("wire_probability must be in [0, 1]");
        }
        Ok(())
    }

    fn layer_cap_reached(&self, layer_count: usize) -> bool {
        self.max_layers > 0 && layer_count as i64 >= self.max_layers
    }
}

/// Tick input: a single row or a row-major grid.
///
/// Rows may be ragged; missing cells read as zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Row(Vec<f64>),
    Grid(Vec<Vec<f64>>),
}

impl From<Vec<f64>> for Tensor {
    fn from(row: Vec<f64>) -> Self {
        Tensor::Row(row)
    }
}

impl From<Vec<Vec<f64>>> for Tensor {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        Tensor::Grid(rows)
    }
}

impl Tensor {
    /// Parse a nested JSON number array of rank 1 or 2.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(GrowNetError::UnsupportedTensorRank(0));
        };
        match items.first() {
            Some(Value::Array(_)) => items
                .iter()
                .map(|row| match row {
                    Value::Array(cells) => cells.iter().map(json_cell).collect::<Result<Vec<f64>>>(),
                    _ => Err(GrowNetError::MalformedTensor("mixed scalar and row entries")),
                })
                .collect::<Result<Vec<_>>>()
                .map(Tensor::Grid),
            _ => items.iter().map(json_cell).collect::<Result<Vec<_>>>().map(Tensor::Row),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    pub fn rank(&self) -> usize {
        match self {
            Tensor::Row(_) => 1,
            Tensor::Grid(_) => 2,
        }
    }

    /// 2D view; a row becomes a single-row grid.
    pub fn rows(&self) -> &[Vec<f64>] {
        match self {
            Tensor::Row(row) => std::slice::from_ref(row),
            Tensor::Grid(rows) => rows,
        }
    }

    /// `(rows, widest row)`.
    pub fn dims(&self) -> (usize, usize) {
        let rows = self.rows();
        (rows.len(), rows.iter().map(Vec::len).max().unwrap_or(0))
    }
}

fn json_cell(value: &Value) -> Result<f64> {
    match value {
        Value::Array(_) => Err(GrowNetError::UnsupportedTensorRank(3)),
        other => other
            .as_f64()
            .ok_or(GrowNetError::MalformedTensor("tensor cells must be numbers")),
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Region
// ─────────────────────────────────────────────────────────────────────────

/// An arena of layers plus the wiring history needed to extend it.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    layers: Vec<Layer>,
    input_ports: HashMap<String, Vec<LayerId>>,
    mesh_rules: Vec<MeshRule>,
    tracts: Vec<Tract>,
    rng: Lcg,
    slot_config: Arc<SlotConfig>,
    growth_policy: Option<GrowthPolicy>,
    last_layer_growth_step: i64,
    step: i64,
    proximity: ProximityState,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_seed(name, DEFAULT_SEED)
    }

    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            input_ports: HashMap::new(),
            mesh_rules: Vec::new(),
            tracts: Vec::new(),
            rng: Lcg::new(seed),
            slot_config: Arc::new(SlotConfig::default()),
            growth_policy: None,
            last_layer_growth_step: -1,
            step: 0,
            proximity: ProximityState::default(),
        }
    }

    /// Region whose layers default to `slot_config`.
    pub fn with_slot_config(name: impl Into<String>, slot_config: SlotConfig) -> Result<Self> {
        slot_config.validate().map_err(GrowNetError::InvalidConfig)?;
        let mut region = Self::new(name);
        region.slot_config = Arc::new(slot_config);
        Ok(region)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id)
    }

    pub fn mesh_rules(&self) -> &[MeshRule] {
        &self.mesh_rules
    }

    pub fn tracts(&self) -> &[Tract] {
        &self.tracts
    }

    pub fn bound_layers(&self, port: &str) -> &[LayerId] {
        self.input_ports.get(port).map_or(&[], Vec::as_slice)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &str> {
        self.input_ports.keys().map(String::as_str)
    }

    /// Completed ticks.
    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn slot_config(&self) -> &Arc<SlotConfig> {
        &self.slot_config
    }

    pub fn growth_policy(&self) -> Option<&GrowthPolicy> {
        self.growth_policy.as_ref()
    }

    pub fn last_layer_growth_step(&self) -> i64 {
        self.last_layer_growth_step
    }

    pub fn total_neurons(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    pub fn total_slots(&self) -> usize {
        self.layers.iter().map(Layer::total_slots).sum()
    }

    pub fn total_synapses(&self) -> usize {
        self.layers.iter().map(Layer::total_synapses).sum()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Layers and ports
    // ─────────────────────────────────────────────────────────────────────────

    fn push_layer(&mut self, build: impl FnOnce(LayerId) -> Layer) -> LayerId {
        let id = self.layers.len();
        self.layers.push(build(id));
        id
    }

    /// Generic layer of `neuron_count` neurons using the region slot config.
    pub fn add_layer(&mut self, neuron_count: usize) -> LayerId {
        let config = Arc::clone(&self.slot_config);
        self.push_layer(|id| {
            let mut layer = Layer::generic(id, format!("L{id}"), config);
            layer.add_neurons(neuron_count);
            layer
        })
    }

    pub fn add_layer_with_config(&mut self, neuron_count: usize, slot_config: SlotConfig) -> Result<LayerId> {
        slot_config.validate().map_err(GrowNetError::InvalidConfig)?;
        let config = Arc::new(slot_config);
        Ok(self.push_layer(|id| {
            let mut layer = Layer::generic(id, format!("L{id}"), config);
            layer.add_neurons(neuron_count);
            layer
        }))
    }

    pub fn add_input_layer_2d(&mut self, height: usize, width: usize, gain: f64, epsilon_fire: f64) -> LayerId {
        let config = Arc::clone(&self.slot_config);
        self.push_layer(|id| Layer::input_2d(id, format!("in{id}"), height, width, gain, epsilon_fire, config))
    }

    pub fn add_output_layer_2d(&mut self, height: usize, width: usize, smoothing: f64) -> LayerId {
        let config = Arc::clone(&self.slot_config);
        self.push_layer(|id| Layer::output_2d(id, format!("out{id}"), height, width, smoothing, config))
    }

    /// Bind `port` to `layer_ids`, replacing any earlier binding.
    ///
    /// Unknown ids are dropped. Returns the number of layers bound.
    pub fn bind_input(&mut self, port: impl Into<String>, layer_ids: &[LayerId]) -> usize {
        let port = port.into();
        let valid: Vec<LayerId> = layer_ids
            .iter()
            .copied()
            .filter(|&id| {
                let ok = id < self.layers.len();
                if !ok {
                    warn!(port = %port, layer = id, "bind_input ignoring unknown layer");
                }
                ok
            })
            .collect();
        let bound = valid.len();
        self.input_ports.insert(port, valid);
        bound
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wiring
    // ─────────────────────────────────────────────────────────────────────────

    fn layers_exist(&self, op: &'static str, src: LayerId, dst: LayerId) -> bool {
        let ok = src < self.layers.len() && dst < self.layers.len();
        if !ok {
            warn!(op, src, dst, layers = self.layers.len(), "invalid layer id");
        }
        ok
    }

    /// Probabilistic all-pairs projection. Records a mesh rule so neurons
    /// grown later on either side are wired with the same probability.
    ///
    /// Returns the number of edges created (0 for unknown layers).
    pub fn connect_layers(&mut self, src: LayerId, dst: LayerId, probability: f64, feedback: bool) -> usize {
        if !self.layers_exist("connect_layers", src, dst) {
            return 0;
        }
        let probability = clamp_probability(probability);
        self.mesh_rules.push(MeshRule {
            src,
            dst,
            probability,
            feedback,
        });
        if probability <= 0.0 {
            return 0;
        }

        let (src_len, dst_len) = (self.layers[src].len(), self.layers[dst].len());
        let mut edges = 0;
        for i in 0..src_len {
            for j in 0..dst_len {
                if src == dst && i == j {
                    continue;
                }
                if self.rng.next_f64() <= probability {
                    self.layers[src].neurons_mut()[i].connect(dst, j, feedback);
                    edges += 1;
                }
            }
        }
        debug!(src, dst, probability, edges, "connect_layers");
        edges
    }

    /// Sliding-window projection from a 2D source.
    ///
    /// With a 2D destination every covered source cell connects to its
    /// window's center, once per (source, center) pair, and the first center
    /// seen per source is stored in a [`Tract`]. Any other destination gets
    /// every covered source connected to all of its neurons.
    ///
    /// Returns the number of distinct covered source cells.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_layers_windowed(
        &mut self,
        src: LayerId,
        dst: LayerId,
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        padding: Padding,
        feedback: bool,
    ) -> usize {
        if !self.layers_exist("connect_layers_windowed", src, dst) {
            return 0;
        }
        let Some((src_h, src_w)) = self.layers[src].shape() else {
            warn!(src, "windowed wiring needs a 2D source layer");
            return 0;
        };
        let dst_shape = self.layers[dst].shape();
        let dst_len = self.layers[dst].len();
        let spec = WindowSpec {
            kernel: (kernel_h, kernel_w),
            stride: (stride_h, stride_w),
            padding,
        };
        let windows = topographic::enumerate_windows((src_h, src_w), dst_shape.unwrap_or((src_h, src_w)), &spec);

        let mut covered = vec![false; src_h * src_w];
        let mut unique = 0;
        let mut center_map = HashMap::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let source = &mut self.layers[src];

        for window in &windows {
            let center = dst_shape.map(|(_, dst_w)| window.center_row * dst_w + window.center_col);
            for (row, col) in window.cells() {
                let s = row * src_w + col;
                let newly_covered = !std::mem::replace(&mut covered[s], true);
                if newly_covered {
                    unique += 1;
                }
                let Some(neuron) = source.neuron_mut(s) else {
                    continue;
                };
                match center {
                    Some(center) => {
                        center_map.entry(s).or_insert(center);
                        if (src == dst && s == center) || !seen.insert((s, center)) {
                            continue;
                        }
                        neuron.connect(dst, center, feedback);
                    }
                    None if newly_covered => {
                        for j in 0..dst_len {
                            if !(src == dst && s == j) {
                                neuron.connect(dst, j, feedback);
                            }
                        }
                    }
                    None => {}
                }
            }
        }

        let tract = Tract::new(src, dst, feedback);
        self.tracts.push(if dst_shape.is_some() {
            tract.with_center_map(center_map)
        } else {
            tract
        });
        debug!(src, dst, windows = windows.len(), unique, "connect_layers_windowed");
        unique
    }

    /// Windowed wiring plus distance-based weights for every center.
    ///
    /// Both layers must be 2D; otherwise nothing is wired and an empty map
    /// is returned.
    pub fn connect_layers_topographic(
        &mut self,
        src: LayerId,
        dst: LayerId,
        cfg: &TopographicConfig,
    ) -> Result<TopographicMap> {
        cfg.validate().map_err(GrowNetError::InvalidConfig)?;
        let shapes = self
            .layer(src)
            .and_then(Layer::shape)
            .zip(self.layer(dst).and_then(Layer::shape));
        let Some(((src_h, src_w), (dst_h, dst_w))) = shapes else {
            warn!(src, dst, "topographic wiring needs 2D source and destination layers");
            return Ok(TopographicMap::default());
        };
        self.connect_layers_windowed(
            src,
            dst,
            cfg.kernel_h,
            cfg.kernel_w,
            cfg.stride_h,
            cfg.stride_w,
            cfg.padding,
            cfg.feedback,
        );
        Ok(topographic::connect_layers_topographic(src_h, src_w, dst_h, dst_w, cfg))
    }

    /// One distance-based autowiring pass at the current step.
    ///
    /// Cross-layer links become mesh rules (probability 1, forward) when the
    /// config asks for it. Returns the number of edges added.
    pub fn apply_proximity(&mut self, cfg: &ProximityConfig) -> usize {
        let outcome = proximity::apply(cfg, self.step, &mut self.layers, &mut self.rng, &mut self.proximity);
        for (src, dst) in outcome.cross_layer_pairs {
            self.mesh_rules.push(MeshRule {
                src,
                dst,
                probability: 1.0,
                feedback: false,
            });
        }
        if outcome.edges_added > 0 {
            debug!(edges = outcome.edges_added, step = self.step, "proximity pass");
        }
        outcome.edges_added
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Growth
    // ─────────────────────────────────────────────────────────────────────────

    /// Install a growth policy and reseed the wiring stream from it.
    pub fn set_growth_policy(&mut self, policy: GrowthPolicy) -> Result<()> {
        policy.validate().map_err(GrowNetError::InvalidConfig)?;
        self.rng = Lcg::new(policy.rng_seed);
        self.growth_policy = Some(policy);
        Ok(())
    }

    /// Add a spillover layer fed by `donor`.
    ///
    /// Returns `None` (and changes nothing) when `donor` is not a layer.
    pub fn request_layer_growth(&mut self, donor: LayerId, probability: f64) -> Option<LayerId> {
        if donor >= self.layers.len() {
            warn!(donor, "request_layer_growth with unknown donor layer");
            return None;
        }
        let count = self
            .growth_policy
            .as_ref()
            .map_or(GrowthPolicy::default().new_layer_neuron_count, |p| p.new_layer_neuron_count);
        let new_layer = self.add_layer(count);
        let edges = self.connect_layers(donor, new_layer, probability, false);
        info!(region = %self.name, donor, new_layer, edges, "layer growth");
        Some(new_layer)
    }

    /// Grow one neuron in `layer` (respecting its limit) and autowire it.
    pub fn try_grow_neuron(&mut self, layer: LayerId) -> Option<usize> {
        let index = self.layers.get_mut(layer)?.try_grow_neuron()?;
        self.autowire_new_neuron(layer, index);
        Some(index)
    }

    /// Extend prior wiring to a freshly grown neuron: mesh rules in both
    /// directions, then tracts sourced at its layer.
    pub fn autowire_new_neuron(&mut self, layer: LayerId, new_index: usize) {
        if self.layer(layer).and_then(|l| l.neuron(new_index)).is_none() {
            return;
        }

        for k in 0..self.mesh_rules.len() {
            let rule = self.mesh_rules[k];
            if rule.src == layer {
                let dst_len = self.layers.get(rule.dst).map_or(0, Layer::len);
                for j in 0..dst_len {
                    if rule.dst == layer && j == new_index {
                        continue;
                    }
                    if self.rng.next_f64() <= rule.probability {
                        self.layers[layer].neurons_mut()[new_index].connect(rule.dst, j, rule.feedback);
                    }
                }
            }
            if rule.dst == layer {
                let src_len = self.layers.get(rule.src).map_or(0, Layer::len);
                for i in 0..src_len {
                    if rule.src == layer && i == new_index {
                        continue;
                    }
                    if self.rng.next_f64() <= rule.probability {
                        self.layers[rule.src].neurons_mut()[i].connect(layer, new_index, rule.feedback);
                    }
                }
            }
        }

        for tract in self.tracts.iter().filter(|t| t.source() == layer) {
            tract.attach_source_neuron(new_index, &mut self.layers);
        }
    }

    fn maybe_grow_layers(&mut self) -> Option<LayerId> {
        let policy = self.growth_policy.as_ref()?;
        if !policy.enable_layer_growth || policy.layer_cap_reached(self.layers.len()) {
            return None;
        }
        let now = self.step;
        let last = self.last_layer_growth_step;
        if last >= 0 && now - last < policy.layer_cooldown_ticks {
            return None;
        }

        let pressure = RegionPressure::measure(&self.layers);
        let avg_hit = pressure.avg_slots >= policy.avg_slots_threshold;
        let pct_hit = policy
            .percent_neurons_at_capacity_threshold
            .is_some_and(|t| pressure.pct_at_capacity >= t);
        if !(avg_hit || pct_hit) {
            return None;
        }

        let probability = policy.wire_probability;
        let Some(donor) = self
            .layers
            .iter()
            .rposition(|l| l.kind().is_trainable() && l.slot_config().layer_growth_active())
        else {
            debug!(region = %self.name, "growth pressure but no trainable donor layer");
            return None;
        };
        let grown = self.request_layer_growth(donor, probability)?;
        self.last_layer_growth_step = now;
        debug!(
            avg_slots = pressure.avg_slots,
            pct_at_capacity = pressure.pct_at_capacity,
            step = now,
            "layer growth triggered"
        );
        Some(grown)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one tick on the sequential path.
    pub fn tick_nd(&mut self, port: &str, tensor: &Tensor) -> RegionMetrics {
        self.tick_nd_with(port, tensor, &ParallelOptions::sequential())
    }

    pub fn tick_2d(&mut self, port: &str, rows: &[Vec<f64>]) -> RegionMetrics {
        self.tick_rows(port, rows, &ParallelOptions::sequential())
    }

    /// Parse `tensor` from JSON and tick.
    pub fn tick_nd_json(&mut self, port: &str, tensor: &Value) -> Result<RegionMetrics> {
        let tensor = Tensor::from_json(tensor)?;
        Ok(self.tick_nd(port, &tensor))
    }

    /// Run one tick; `options` only affects the read-only output scan.
    pub fn tick_nd_with(&mut self, port: &str, tensor: &Tensor, options: &ParallelOptions) -> RegionMetrics {
        self.tick_rows(port, tensor.rows(), options)
    }

    fn tick_rows(&mut self, port: &str, rows: &[Vec<f64>], options: &ParallelOptions) -> RegionMetrics {
        if self.bound_layers(port).is_empty() {
            self.provision_input(port, rows);
        }

        // Delivery
        let bound: Vec<LayerId> = self.bound_layers(port).to_vec();
        let mut queue = VecDeque::new();
        let mut delivered = 0u64;
        let mut addressable = 0u64;
        for &id in &bound {
            let (cells, fired) = deliver_tensor(&mut self.layers[id], rows);
            addressable += cells as u64;
            delivered += fired.len() as u64;
            queue.extend(fired.into_iter().map(|(index, amplitude)| (id, index, amplitude)));
        }
        self.propagate(queue);

        // Output scan
        let outputs: Vec<LayerId> = self
            .layers
            .iter()
            .filter(|l| matches!(l.kind(), LayerKind::Output2D { .. }))
            .map(Layer::id)
            .collect();
        let stats = if outputs.is_empty() {
            ImageRef::Rows(rows).stats()
        } else {
            outputs.iter().fold(SpatialStats::default(), |acc, &id| {
                acc.merge(&scan_output(&self.layers[id], options))
            })
        };
        for &id in &outputs {
            self.layers[id].refresh_output_frame();
        }

        // End of tick
        for id in 0..self.layers.len() {
            if let Some(grown) = self.layers[id].end_tick() {
                self.autowire_new_neuron(id, grown);
            }
        }
        self.step += 1;
        self.maybe_grow_layers();

        RegionMetrics {
            delivered_events: delivered,
            total_slots: addressable,
            total_synapses: self.total_synapses() as u64,
            ..RegionMetrics::default()
        }
        .with_spatial(&stats)
    }

    fn provision_input(&mut self, port: &str, rows: &[Vec<f64>]) {
        let height = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if height == 0 || width == 0 {
            return;
        }
        let config = Arc::clone(&self.slot_config);
        let id = self.push_layer(|id| {
            Layer::input_2d(id, port, height, width, AUTO_INPUT_GAIN, AUTO_INPUT_EPSILON, config)
        });
        self.input_ports.insert(port.to_string(), vec![id]);
        info!(region = %self.name, port, height, width, layer = id, "auto-provisioned input layer");
    }

    /// Breadth-first delivery of fired outputs. A neuron forwards at most
    /// once per tick, so cycles terminate.
    fn propagate(&mut self, mut queue: VecDeque<(LayerId, usize, f64)>) {
        while let Some((layer, index, amplitude)) = queue.pop_front() {
            let Some(neuron) = self.layers.get_mut(layer).and_then(|l| l.neuron_mut(index)) else {
                continue;
            };
            if !neuron.claim_propagation() {
                continue;
            }
            let targets = neuron.outgoing().to_vec();
            for synapse in targets {
                let fired = self
                    .layers
                    .get_mut(synapse.target_layer)
                    .is_some_and(|l| l.deliver(synapse.target_neuron, amplitude));
                if fired {
                    queue.push_back((synapse.target_layer, synapse.target_neuron, amplitude));
                }
            }
        }
    }

    /// Stateless spatial summary of `image`; see [`spatial_metrics`].
    pub fn compute_spatial_metrics(&self, image: ImageRef<'_>, prefer_output: bool) -> RegionMetrics {
        spatial_metrics(image, prefer_output)
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Deliver a 2D tensor to one bound layer.
///
/// Returns the layer's addressable cell count and the `(index, amplitude)`
/// of every neuron that fired.
fn deliver_tensor(layer: &mut Layer, rows: &[Vec<f64>]) -> (usize, Vec<(usize, f64)>) {
    let Some((height, width, gain, epsilon)) = grid_delivery(layer.kind()) else {
        return deliver_flat(layer, rows);
    };
    let cell = |r: usize, c: usize| rows.get(r).and_then(|row| row.get(c)).copied().unwrap_or(0.0);

    let mut fired = Vec::new();
    for r in 0..height {
        for c in 0..width {
            let value = cell(r, c);
            if value.is_nan() || value <= 0.0 {
                continue;
            }
            let amplitude = value * gain;
            if amplitude < epsilon {
                continue;
            }
            let index = r * width + c;
            if layer.deliver_2d(index, amplitude, r, c) {
                fired.push((index, amplitude));
            }
        }
    }
    (height * width, fired)
}

/// `(height, width, gain, epsilon_fire)` for layers fed cell by cell.
fn grid_delivery(kind: &LayerKind) -> Option<(usize, usize, f64, f64)> {
    match *kind {
        LayerKind::Input2D {
            height,
            width,
            gain,
            epsilon_fire,
        } => Some((height, width, gain, epsilon_fire)),
        LayerKind::Output2D { height, width, .. } => Some((height, width, 1.0, 0.0)),
        LayerKind::Generic => None,
    }
}

/// Generic layers take the row-major cells as scalar inputs by index.
fn deliver_flat(layer: &mut Layer, rows: &[Vec<f64>]) -> (usize, Vec<(usize, f64)>) {
    let len = layer.len();
    let mut fired = Vec::new();
    for (index, &value) in rows.iter().flatten().enumerate().take(len) {
        if value > 0.0 && layer.deliver(index, value) {
            fired.push((index, value));
        }
    }
    (len, fired)
}

/// Amplitude-weighted statistics of one output layer, scanned per row and
/// merged in row order.
fn scan_output(layer: &Layer, options: &ParallelOptions) -> SpatialStats {
    let (height, width) = layer.shape().unwrap_or((0, 0));
    let neurons = layer.neurons();
    pal::parallel_map(
        &(0..height),
        |row| {
            let mut stats = SpatialStats::default();
            for col in 0..width {
                let amplitude = neurons.get(row * width + col).map_or(0.0, |n| n.accumulated_amplitude());
                stats.observe(row, col, amplitude);
            }
            stats
        },
        |parts| parts.iter().fold(SpatialStats::default(), |acc, part| acc.merge(part)),
        options,
    )
}

/// Region-wide slot pressure used by layer growth.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegionPressure {
    pub avg_slots: f64,
    pub pct_at_capacity: f64,
}

impl RegionPressure {
    /// Average slots per neuron and the percentage of neurons that are at
    /// capacity and last fell back, over every layer.
    pub fn measure(layers: &[Layer]) -> Self {
        let mut neurons = 0usize;
        let mut slots = 0usize;
        let mut saturated = 0usize;
        for neuron in layers.iter().flat_map(Layer::neurons) {
            neurons += 1;
            slots += neuron.slot_count();
            if neuron.is_at_capacity() && neuron.last_slot_used_fallback() {
                saturated += 1;
            }
        }
        if neurons == 0 {
            return Self::default();
        }
        Self {
            avg_slots: slots as f64 / neurons as f64,
            pct_at_capacity: 100.0 * saturated as f64 / neurons as f64,
        }
    }
}
