use std::sync::Arc;

use tracing::debug;

use crate::bus::LateralBus;
use crate::neuron::Neuron;
use crate::slot_config::SlotConfig;

/// Stable index of a layer inside its region.
pub type LayerId = usize;

/// Layer shape and role.
///
/// 2D kinds always pre-populate `height * width` neurons; `Generic` layers
/// start empty and grow.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Generic,
    Input2D {
        height: usize,
        width: usize,
        /// Scales each incoming cell before it reaches the neuron.
        gain: f64,
        /// Scaled amplitudes below this are not delivered.
        epsilon_fire: f64,
    },
    Output2D {
        height: usize,
        width: usize,
        /// EMA factor for `frame`; 0 follows the current tick exactly.
        smoothing: f64,
        frame: Vec<f64>,
    },
}

impl LayerKind {
    /// `(height, width)` for 2D kinds.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            LayerKind::Generic => None,
            LayerKind::Input2D { height, width, .. } | LayerKind::Output2D { height, width, .. } => {
                Some((*height, *width))
            }
        }
    }

    /// Region-level growth only spills over from trainable (non I/O) layers.
    pub fn is_trainable(&self) -> bool {
        matches!(self, LayerKind::Generic)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Generic => "generic",
            LayerKind::Input2D { .. } => "input2d",
            LayerKind::Output2D { .. } => "output2d",
        }
    }
}

/// A population of neurons sharing one [`LateralBus`] and one [`SlotConfig`].
///
/// Layers live in their region's arena and know their own id. Growing a
/// neuron only appends here; the region wires it afterwards.
#[derive(Debug, Clone)]
pub struct Layer {
    id: LayerId,
    name: String,
    kind: LayerKind,
    bus: LateralBus,
    neurons: Vec<Neuron>,
    neuron_limit: i64,
    slot_config: Arc<SlotConfig>,
}

impl Layer {
    /// Build a layer of `kind`.
    ///
    /// Generic layers start empty and are capped at the config's
    /// `layer_neuron_limit_default`. Shaped layers are pre-populated with one
    /// neuron per cell and have no neuron limit, since the caller fixes their
    /// size and a grid larger than the default cap must still be able to grow.
    pub fn new(
        id: LayerId,
        name: impl Into<String>,
        kind: LayerKind,
        slot_config: Arc<SlotConfig>,
    ) -> Self {
        let neuron_limit = match kind {
            LayerKind::Generic => slot_config.layer_neuron_limit_default,
            LayerKind::Input2D { .. } | LayerKind::Output2D { .. } => -1,
        };
        let mut layer = Self {
            id,
            name: name.into(),
            kind,
            bus: LateralBus::default(),
            neurons: Vec::new(),
            neuron_limit,
            slot_config,
        };
        if let Some((height, width)) = layer.kind.shape() {
            layer.add_neurons(height * width);
        }
        layer
    }

    pub fn generic(id: LayerId, name: impl Into<String>, slot_config: Arc<SlotConfig>) -> Self {
        Self::new(id, name, LayerKind::Generic, slot_config)
    }

    pub fn input_2d(
        id: LayerId,
        name: impl Into<String>,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
        slot_config: Arc<SlotConfig>,
    ) -> Self {
        Self::new(
            id,
            name,
            LayerKind::Input2D {
                height,
                width,
                gain,
                epsilon_fire,
            },
            slot_config,
        )
    }

    pub fn output_2d(
        id: LayerId,
        name: impl Into<String>,
        height: usize,
        width: usize,
        smoothing: f64,
        slot_config: Arc<SlotConfig>,
    ) -> Self {
        Self::new(
            id,
            name,
            LayerKind::Output2D {
                height,
                width,
                smoothing: smoothing.clamp(0.0, 1.0),
                frame: vec![0.0; height * width],
            },
            slot_config,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.kind.shape()
    }

    /// Height for 2D kinds, 0 for generic layers.
    pub fn height(&self) -> usize {
        self.shape().map_or(0, |(h, _)| h)
    }

    /// Width for 2D kinds, 0 for generic layers.
    pub fn width(&self) -> usize {
        self.shape().map_or(0, |(_, w)| w)
    }

    pub fn bus(&self) -> &LateralBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut LateralBus {
        &mut self.bus
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neurons_mut(&mut self) -> &mut [Neuron] {
        &mut self.neurons
    }

    pub fn neuron(&self, index: usize) -> Option<&Neuron> {
        self.neurons.get(index)
    }

    pub fn neuron_mut(&mut self, index: usize) -> Option<&mut Neuron> {
        self.neurons.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn neuron_limit(&self) -> i64 {
        self.neuron_limit
    }

    pub fn set_neuron_limit(&mut self, limit: i64) {
        self.neuron_limit = limit;
    }

    pub fn slot_config(&self) -> &Arc<SlotConfig> {
        &self.slot_config
    }

    /// Smoothed output frame for `Output2D` layers.
    pub fn output_frame(&self) -> Option<&[f64]> {
        match &self.kind {
            LayerKind::Output2D { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Row-major flattening shared by every 2D consumer.
    #[inline]
    pub fn index_at(&self, row: usize, col: usize) -> usize {
        row * self.width() + col
    }

    pub fn total_slots(&self) -> usize {
        self.neurons.iter().map(Neuron::slot_count).sum()
    }

    pub fn total_synapses(&self) -> usize {
        self.neurons.iter().map(Neuron::outgoing_count).sum()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input delivery
    // ─────────────────────────────────────────────────────────────────────────

    /// Scalar input to one neuron through this layer's bus.
    pub fn deliver(&mut self, index: usize, value: f64) -> bool {
        let bus = &self.bus;
        match self.neurons.get_mut(index) {
            Some(neuron) => neuron.on_input(value, bus),
            None => false,
        }
    }

    /// Spatial input to one neuron through this layer's bus.
    pub fn deliver_2d(&mut self, index: usize, value: f64, row: usize, col: usize) -> bool {
        let bus = &self.bus;
        match self.neurons.get_mut(index) {
            Some(neuron) => neuron.on_input_2d(value, row, col, bus),
            None => false,
        }
    }

    /// Fold this tick's accumulated amplitudes into the output frame.
    pub(crate) fn refresh_output_frame(&mut self) {
        if let LayerKind::Output2D {
            smoothing, frame, ..
        } = &mut self.kind
        {
            let keep = *smoothing;
            for (cell, neuron) in frame.iter_mut().zip(self.neurons.iter()) {
                *cell = keep * *cell + (1.0 - keep) * neuron.accumulated_amplitude();
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Growth and lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Unconditional bulk append, used for initial sizing.
    pub fn add_neurons(&mut self, count: usize) {
        self.neurons.reserve(count);
        for _ in 0..count {
            let index = self.neurons.len();
            let id = format!("{}.{}", self.name, index);
            self.neurons.push(Neuron::new(id, Arc::clone(&self.slot_config)));
        }
    }

    /// Appends one neuron unless the neuron limit is reached.
    ///
    /// The caller (normally the region) is responsible for autowiring the new
    /// index.
    pub fn try_grow_neuron(&mut self) -> Option<usize> {
        if self.neuron_limit >= 0 && self.neurons.len() as i64 >= self.neuron_limit {
            return None;
        }
        let index = self.neurons.len();
        self.add_neurons(1);
        Some(index)
    }

    /// End-of-tick bookkeeping: reset amplitudes, grow at most one neuron from
    /// fallback pressure, then decay the bus.
    ///
    /// Returns the index of the grown neuron, if any.
    pub fn end_tick(&mut self) -> Option<usize> {
        for neuron in &mut self.neurons {
            neuron.reset_accumulated_amplitude();
        }

        let mut grown = None;
        if self.slot_config.neuron_growth_active() {
            let step = self.bus.current_step();
            if let Some(trigger) = self.neurons.iter().position(|n| n.growth_ready(step)) {
                grown = self.try_grow_neuron();
                match grown {
                    Some(index) => {
                        self.neurons[trigger].set_last_growth_tick(step);
                        debug!(layer = %self.name, trigger, new_index = index, step, "neuron growth");
                    }
                    None => {
                        debug!(layer = %self.name, trigger, limit = self.neuron_limit, "neuron growth blocked by limit");
                    }
                }
            }
        }

        self.bus.decay();
        grown
    }
}
