use hashbrown::HashMap;

use crate::layer::{Layer, LayerId};

/// A recorded layer-to-layer projection.
///
/// Windowed connections store `center_map` (source index to destination
/// center index) so neurons grown later in the source layer can be wired the
/// same way without replaying the whole window sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Tract {
    source: LayerId,
    dest: LayerId,
    feedback: bool,
    center_map: Option<HashMap<usize, usize>>,
}

impl Tract {
    pub fn new(source: LayerId, dest: LayerId, feedback: bool) -> Self {
        Self {
            source,
            dest,
            feedback,
            center_map: None,
        }
    }

    pub fn with_center_map(mut self, center_map: HashMap<usize, usize>) -> Self {
        self.center_map = Some(center_map);
        self
    }

    pub fn source(&self) -> LayerId {
        self.source
    }

    pub fn dest(&self) -> LayerId {
        self.dest
    }

    pub fn feedback(&self) -> bool {
        self.feedback
    }

    pub fn center_map(&self) -> Option<&HashMap<usize, usize>> {
        self.center_map.as_ref()
    }

    pub fn center_for(&self, source_index: usize) -> Option<usize> {
        self.center_map.as_ref()?.get(&source_index).copied()
    }

    /// Connect a newly grown source neuron to its mapped destination center.
    ///
    /// Returns false (and does nothing) when there is no mapping for the
    /// index or either endpoint is out of range.
    pub fn attach_source_neuron(&self, new_source_index: usize, layers: &mut [Layer]) -> bool {
        let Some(center) = self.center_for(new_source_index) else {
            return false;
        };
        let dest_len = layers.get(self.dest).map_or(0, Layer::len);
        if center >= dest_len {
            return false;
        }
        match layers
            .get_mut(self.source)
            .and_then(|layer| layer.neuron_mut(new_source_index))
        {
            Some(neuron) => {
                neuron.connect(self.dest, center, self.feedback);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::neuron::Synapse;
    use crate::slot_config::SlotConfig;

    fn layers() -> Vec<Layer> {
        let mut src = Layer::generic(0, "src", Arc::new(SlotConfig::default()));
        src.add_neurons(4);
        let dst = Layer::output_2d(1, "dst", 2, 2, 0.0, Arc::default());
        vec![src, dst]
    }

    #[test]
    fn attach_uses_center_map() {
        let mut layers = layers();
        let mut map = HashMap::new();
        map.insert(3, 2);
        let tract = Tract::new(0, 1, true).with_center_map(map);

        assert!(tract.attach_source_neuron(3, &mut layers));
        let expected = Synapse {
            target_layer: 1,
            target_neuron: 2,
            feedback: true,
        };
        assert_eq!(layers[0].neurons()[3].outgoing(), &[expected]);
    }

    #[test]
    fn attach_without_mapping_is_a_no_op() {
        let mut layers = layers();
        let plain = Tract::new(0, 1, false);
        assert!(!plain.attach_source_neuron(0, &mut layers));

        let mut map = HashMap::new();
        map.insert(0, 9); // center outside destination
        let bad = Tract::new(0, 1, false).with_center_map(map);
        assert!(!bad.attach_source_neuron(0, &mut layers));
        assert!(!bad.attach_source_neuron(1, &mut layers));
        assert_eq!(layers[0].total_synapses(), 0);
    }
}
