use serde::{Deserialize, Serialize};

use super::metrics::Resource;

/// A cloud provider machine type with fixed capacity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeShape {
    /// Unique type name assigned for this shape by the cloud provider.
    pub name: String,
    /// Resources available as part of this shape.
    pub capacity: Resource,
}
