//! Scaling policies evaluated against the cluster snapshot each tick.

use anyhow::{bail, Result};
use clap::ArgEnum;
use resources::objects::{metrics::Resource, node::DerivedStats};
use strum::Display;

use crate::cluster::Cluster;

/// Lookback window whose 90th-percentile usage drives the scaling decision.
/// Minute reacts aggressively, hour moderately, day conservatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ArgEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Horizon {
    Minute,
    Hour,
    Day,
}

pub trait Policy: Send + Sync {
    fn perform_scaling(&self, cluster: &mut Cluster) -> Result<()>;
}

/// Grows the cluster by one node when most stable nodes run hot.
///
/// A single busy node in a large cluster never triggers growth; only broad
/// contention does. One node per tick gives the next tick a chance to see
/// the cluster rebalance before deciding again.
pub struct ClusterUsagePolicy {
    /// Percent of capacity beyond which a node counts as hot.
    threshold: u64,
    horizon: Horizon,
}

impl ClusterUsagePolicy {
    pub fn new(threshold: u64, horizon: Horizon) -> Result<Self> {
        if threshold == 0 || threshold > 100 {
            bail!("Cluster scaling threshold invalid: {}", threshold);
        }
        Ok(Self {
            threshold,
            horizon,
        })
    }

    /// The stats backing this policy's horizon, if that window is usable.
    fn usage_for_horizon(&self, stats: &DerivedStats) -> Option<Resource> {
        let window = match self.horizon {
            Horizon::Minute => &stats.minute_usage,
            Horizon::Hour => &stats.hour_usage,
            Horizon::Day => &stats.day_usage,
        };
        if !window.valid {
            return None;
        }
        Some(Resource {
            cpu: window.cpu.ninety,
            memory: window.memory.ninety,
        })
    }
}

/// Percentage of `limit` consumed by `value`. Usage beyond capacity reads as
/// fully consumed.
fn utilization_of(value: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 100;
    }
    100 - limit.saturating_sub(value) * 100 / limit
}

impl Policy for ClusterUsagePolicy {
    fn perform_scaling(&self, cluster: &mut Cluster) -> Result<()> {
        let mut nodes_above_threshold: u64 = 0;
        let mut stable_nodes: u64 = 0;
        let mut slack = cluster.slack;

        for entry in cluster.current.values() {
            let node = &entry.node;
            let usage = match self.usage_for_horizon(&node.usage) {
                Some(usage) => usage,
                // The latest stats are unavailable, which happens when the
                // node is unresponsive. Leave it out of the denominator.
                None => continue,
            };
            stable_nodes += 1;
            if utilization_of(usage.cpu, node.capacity.cpu) >= self.threshold
                || utilization_of(usage.memory, node.capacity.memory) >= self.threshold
            {
                tracing::debug!(
                    "Host {} is using more than {}% of its capacity",
                    node.hostname,
                    self.threshold
                );
                nodes_above_threshold += 1;
            }
            slack.cpu += node.capacity.cpu.saturating_sub(usage.cpu);
            slack.memory += node.capacity.memory.saturating_sub(usage.memory);
        }

        cluster.slack = slack;
        if nodes_above_threshold > 0
            && nodes_above_threshold * 100 / stable_nodes > self.threshold
            && cluster.new.is_empty()
        {
            tracing::info!(
                "{} of {} stable nodes are above their threshold resource usage. \
                 Increasing cluster size by one node.",
                nodes_above_threshold,
                stable_nodes
            );
            cluster.new.push(cluster.default_shape.name.clone());
        }
        Ok(())
    }
}
