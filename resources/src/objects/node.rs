use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::metrics::{Capacity, Usage};

/// Identity of one worker in the cluster.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeId {
    /// Node name as reported by the orchestrator.
    pub name: String,
    /// Host ip for the node api.
    pub address: String,
}

/// Usage estimators for one node over the three lookback windows.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DerivedStats {
    /// Time of the last successful poll. A flaky node stays listed for an
    /// hour; this shows how stale its stats are.
    pub last_update: NaiveDateTime,
    /// Percentiles in the last (observed) minute.
    pub minute_usage: Usage,
    /// Percentiles in the last hour, barring node outages.
    pub hour_usage: Usage,
    /// Percentiles in the last day, barring node outages.
    pub day_usage: Usage,
}

impl Default for DerivedStats {
    fn default() -> Self {
        Self {
            last_update: NaiveDateTime::from_timestamp(0, 0),
            minute_usage: Usage::default(),
            hour_usage: Usage::default(),
            day_usage: Usage::default(),
        }
    }
}

/// Everything the collector knows about one node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NodeData {
    pub id: NodeId,
    pub capacity: Capacity,
    pub stats: DerivedStats,
}

impl NodeData {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            capacity: Capacity::default(),
            stats: DerivedStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;
    use crate::objects::metrics::Percentiles;

    #[test]
    fn node_data_survives_serde_round_trip() {
        let node = NodeData {
            id: NodeId {
                name: "minion-3".to_string(),
                address: "1.0.0.3".to_string(),
            },
            capacity: Capacity {
                cpu: 8000,
                memory: 8 * 1024 * 1024 * 1024,
            },
            stats: DerivedStats {
                last_update: Local::now().naive_utc(),
                minute_usage: Usage {
                    valid: true,
                    cpu: Percentiles {
                        mean: 15,
                        max: 161,
                        ninety: 123,
                    },
                    memory: Percentiles {
                        mean: 1073741824,
                        max: 9663676416,
                        ninety: 7516192768,
                    },
                },
                ..DerivedStats::default()
            },
        };

        let encoded = serde_json::to_string(&node).unwrap();
        let decoded: NodeData = serde_json::from_str(&encoded).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn wire_field_names_are_snake_case() {
        let node = NodeData::new(NodeId {
            name: "minion-0".to_string(),
            address: "1.0.0.0".to_string(),
        });
        let encoded = serde_json::to_string(&node).unwrap();
        assert!(encoded.contains("\"minute_usage\""));
        assert!(encoded.contains("\"last_update\""));
        assert!(encoded.contains("\"ninety\""));
    }
}
