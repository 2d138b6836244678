//! The cluster snapshot a housekeeping tick evaluates policies against.

use std::collections::HashMap;

use resources::objects::{metrics::Resource, shape::NodeShape};

use crate::{aggregator::Node, shapes::NodeShapes};

/// One observed node together with the catalog shape its capacity matched.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub node: Node,
    pub shape_name: String,
}

/// Built fresh each tick; policies record their decisions in `new`.
#[derive(Debug)]
pub struct Cluster {
    /// Shapes available from the provisioner.
    pub shapes: NodeShapes,
    /// Shape used when adding a node.
    pub default_shape: NodeShape,
    /// Hostname to observed node.
    pub current: HashMap<String, ClusterNode>,
    /// Shape names to provision this tick.
    pub new: Vec<String>,
    /// Aggregate unused capacity over stable nodes.
    pub slack: Resource,
}

impl Cluster {
    pub fn new(shapes: NodeShapes, default_shape: NodeShape) -> Self {
        Self {
            shapes,
            default_shape,
            current: HashMap::new(),
            new: Vec::new(),
            slack: Resource::default(),
        }
    }
}
