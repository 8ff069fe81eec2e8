use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{GrowNetError, Result};
use crate::region::Region;

/// Owns regions by opaque `"R<n>"` ids.
///
/// Ids are never reused within one registry.
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: BTreeMap<u64, Region>,
    next_id: u64,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a region and return its id.
    pub fn create(&mut self, name: impl Into<String>) -> String {
        self.insert(Region::new(name))
    }

    pub fn create_with_seed(&mut self, name: impl Into<String>, seed: u64) -> String {
        self.insert(Region::with_seed(name, seed))
    }

    /// Take ownership of an existing region.
    pub fn insert(&mut self, region: Region) -> String {
        let n = self.next_id;
        self.next_id += 1;
        debug!(id = n, name = region.name(), "region registered");
        self.regions.insert(n, region);
        format_id(n)
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.get(&parse_id(id)?)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Region> {
        self.regions.get_mut(&parse_id(id)?)
    }

    /// Like [`get_mut`](Self::get_mut), but an unknown id is an error.
    pub fn region_mut(&mut self, id: &str) -> Result<&mut Region> {
        self.get_mut(id)
            .ok_or_else(|| GrowNetError::UnknownRegion(id.to_string()))
    }

    /// Remove a region and hand it back.
    pub fn destroy(&mut self, id: &str) -> Result<Region> {
        parse_id(id)
            .and_then(|n| self.regions.remove(&n))
            .ok_or_else(|| GrowNetError::UnknownRegion(id.to_string()))
    }

    /// Live ids in creation order.
    pub fn list_ids(&self) -> Vec<String> {
        self.regions.keys().copied().map(format_id).collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

fn format_id(n: u64) -> String {
    format!("R{n}")
}

fn parse_id(id: &str) -> Option<u64> {
    id.strip_prefix('R')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Tensor;

    #[test]
    fn ids_are_sequential_and_not_reused() {
        let mut registry = RegionRegistry::new();
        assert_eq!(registry.create("a"), "R0");
        assert_eq!(registry.create("b"), "R1");
        assert!(registry.destroy("R0").is_ok());
        assert_eq!(registry.create("c"), "R2");
        assert_eq!(registry.list_ids(), vec!["R1", "R2"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn list_ids_orders_numerically() {
        let mut registry = RegionRegistry::new();
        for i in 0..12 {
            registry.create(format!("r{i}"));
        }
        let ids = registry.list_ids();
        assert_eq!(ids[2], "R2");
        assert_eq!(ids[11], "R11");
    }

    #[test]
    fn unknown_ids() {
        let mut registry = RegionRegistry::new();
        registry.create("a");
        assert!(registry.get("R9").is_none());
        assert!(registry.get("x0").is_none());
        assert!(matches!(registry.destroy("R9"), Err(GrowNetError::UnknownRegion(id)) if id == "R9"));
        assert!(registry.region_mut("nope").is_err());
    }

    #[test]
    fn regions_are_independent() {
        let mut registry = RegionRegistry::new();
        let a = registry.create("a");
        let b = registry.create_with_seed("b", 7);

        let m = registry
            .region_mut(&a)
            .map(|r| r.tick_nd("in", &Tensor::from(vec![1.0, 0.0])))
            .unwrap();
        assert_eq!(m.delivered_events, 1);
        assert_eq!(registry.get(&a).map(Region::step), Some(1));
        assert_eq!(registry.get(&b).map(Region::step), Some(0));
        assert_eq!(registry.get(&b).map(Region::name), Some("b"));
    }
}
