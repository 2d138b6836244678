//! The provisioner's shape catalog and nearest-shape matching.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use resources::objects::{metrics::Resource, shape::NodeShape};

/// All the node shapes available for this cluster, in catalog order so that
/// matching is deterministic.
#[derive(Debug, Clone, Default)]
pub struct NodeShapes {
    shapes: Vec<NodeShape>,
}

impl NodeShapes {
    pub fn from_catalog(catalog: BTreeMap<String, Resource>) -> Self {
        let shapes = catalog
            .into_iter()
            .map(|(name, capacity)| NodeShape {
                name,
                capacity,
            })
            .collect();
        Self {
            shapes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// The shape closest to `expected`, replacing the running best whenever
    /// either dimension's delta strictly improves. Earlier catalog entries
    /// win ties.
    pub fn with_capacity(&self, expected: Resource) -> Result<&NodeShape> {
        let mut best = self
            .shapes
            .first()
            .with_context(|| "no node shapes available")?;
        for candidate in &self.shapes[1..] {
            let new_cpu = abs_delta(candidate.capacity.cpu, expected.cpu);
            let old_cpu = abs_delta(best.capacity.cpu, expected.cpu);
            let new_memory = abs_delta(candidate.capacity.memory, expected.memory);
            let old_memory = abs_delta(best.capacity.memory, expected.memory);
            if new_cpu < old_cpu || new_memory < old_memory {
                best = candidate;
            }
        }
        Ok(best)
    }

    /// Exact lookup by shape name.
    pub fn with_name(&self, name: &str) -> Result<&NodeShape> {
        self.shapes
            .iter()
            .find(|shape| shape.name == name)
            .with_context(|| format!("unrecognized node shape: {}", name))
    }
}

fn abs_delta(a: u64, b: u64) -> u64 {
    if a > b {
        a - b
    } else {
        b - a
    }
}
