use crate::layer::{Layer, LayerId};
use crate::region::Region;

/// A read-only snapshot of a region's structure.
///
/// Design intent:
/// - Observers cannot mutate or steer the region.
/// - Snapshotting is *on-demand* and allocates; the tick path stays unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSnapshot {
    pub name: String,
    pub step: i64,
    pub layers: Vec<LayerSummary>,
    pub mesh_rules: usize,
    pub tracts: usize,
    pub bound_ports: Vec<String>,
}

impl RegionSnapshot {
    pub fn total_neurons(&self) -> usize {
        self.layers.iter().map(|l| l.neurons).sum()
    }

    pub fn total_synapses(&self) -> usize {
        self.layers.iter().map(|l| l.synapses).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    pub kind: &'static str,
    pub shape: Option<(usize, usize)>,
    pub neurons: usize,
    pub slots: usize,
    pub synapses: usize,
    pub bus_step: i64,
}

impl LayerSummary {
    fn of(layer: &Layer) -> Self {
        Self {
            id: layer.id(),
            name: layer.name().to_string(),
            kind: layer.kind().label(),
            shape: layer.shape(),
            neurons: layer.len(),
            slots: layer.total_slots(),
            synapses: layer.total_synapses(),
            bus_step: layer.bus().current_step(),
        }
    }
}

pub struct RegionAdapter<'a> {
    region: &'a Region,
}

impl<'a> RegionAdapter<'a> {
    pub fn new(region: &'a Region) -> Self {
        Self { region }
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        let mut bound_ports: Vec<String> = self.region.input_ports().map(str::to_string).collect();
        bound_ports.sort_unstable();

        RegionSnapshot {
            name: self.region.name().to_string(),
            step: self.region.step(),
            layers: self.region.layers().iter().map(LayerSummary::of).collect(),
            mesh_rules: self.region.mesh_rules().len(),
            tracts: self.region.tracts().len(),
            bound_ports,
        }
    }
}
