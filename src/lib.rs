//! # grownet
//!
//! A growing neural substrate built from slot-gated neurons.
//!
//! Neurons keep independent weights per "slot" (a bucket of relative input
//! change, or of spatial offset from a first anchor). When the slot budget
//! runs out the substrate grows: new slots, then new neurons, then whole
//! layers, each wired with the region's recorded mesh rules and tracts.
//!
//! ## Quick Start
//!
//! ```
//! use grownet::prelude::*;
//!
//! let mut region = Region::new("vision");
//! let input = region.add_input_layer_2d(4, 4, 1.0, 0.01);
//! let output = region.add_output_layer_2d(4, 4, 0.2);
//! region.bind_input("pixels", &[input]);
//! region.connect_layers_windowed(input, output, 3, 3, 1, 1, Padding::Same, false);
//!
//! let mut frame = vec![vec![0.0; 4]; 4];
//! frame[1][2] = 1.0;
//! let metrics = region.tick_nd("pixels", &Tensor::from(frame));
//! assert_eq!(metrics.delivered_events, 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Enable serialization/deserialization of configs and metrics
//! - `parallel`: Use a rayon thread pool for PAL in-process mapping
//!
//! ## Modules
//!
//! - [`region`]: Layers, wiring, growth and the tick
//! - [`layer`], [`neuron`], [`slot_config`]: Slot-gated units and their policy
//! - [`topographic`], [`proximity`]: Windowed and distance-based wiring
//! - [`pal`]: Deterministic parallel helpers and the worker pool
//! - [`registry`]: Regions addressed by opaque ids
//! - [`observer`]: Read-only observation adapters

#[path = "core/weight.rs"]
pub mod weight;

#[path = "core/bus.rs"]
pub mod bus;

#[path = "core/slot_config.rs"]
pub mod slot_config;

#[path = "core/neuron.rs"]
pub mod neuron;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/tract.rs"]
pub mod tract;

#[path = "core/rng.rs"]
pub mod rng;

#[path = "core/metrics.rs"]
pub mod metrics;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/pal.rs"]
pub mod pal;

#[path = "core/topographic.rs"]
pub mod topographic;

#[path = "core/proximity.rs"]
pub mod proximity;

#[path = "core/region.rs"]
pub mod region;

#[path = "core/registry.rs"]
pub mod registry;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use grownet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::LateralBus;
    pub use crate::error::{GrowNetError, Result};
    pub use crate::layer::{Layer, LayerId, LayerKind};
    pub use crate::metrics::{ImageRef, RegionMetrics};
    pub use crate::neuron::{Neuron, Synapse};
    pub use crate::observer::{RegionAdapter, RegionSnapshot};
    pub use crate::pal::{Device, ParallelOptions, Reduction, WorkerPool};
    pub use crate::proximity::{ProximityConfig, ProximityFunction};
    pub use crate::region::{GrowthPolicy, MeshRule, Region, Tensor};
    pub use crate::registry::RegionRegistry;
    pub use crate::slot_config::{AnchorMode, SlotConfig};
    pub use crate::topographic::{Padding, TopographicConfig, WeightMode};
    pub use crate::weight::Weight;
}
