//! Client for one node's local metrics endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use resources::objects::{
    metrics::{Capacity, Percentiles, Usage},
    node::NodeId,
};
use serde::Deserialize;

use crate::percentile;

/// Number of (per-second) stats to retrieve on each update.
const NUM_STATS_PER_UPDATE: u32 = 60;

#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Machine capacity as reported by the node.
    async fn machine_spec(&self, id: &NodeId) -> Result<Capacity>;
    /// Usage percentiles over the last collection window.
    async fn update_stats(&self, id: &NodeId) -> Result<Usage>;
}

#[derive(Debug, Deserialize)]
struct MachineInfo {
    num_cores: u64,
    memory_capacity: u64,
}

#[derive(Debug, Deserialize)]
struct MachineStats {
    stats: Vec<RawSample>,
}

/// One per-second stat record from the node metrics endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuSample,
    pub memory: MemorySample,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CpuSample {
    pub usage: CpuUsage,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CpuUsage {
    /// Cumulative cpu time consumed, in nanoseconds.
    pub total: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemorySample {
    /// Working set size in bytes. Actual usage is ignored.
    pub working_set: u64,
}

pub struct KubeNodeApi {
    /// Kubelet port used for retrieving node stats.
    kubelet_port: u16,
    client: Client,
}

impl KubeNodeApi {
    pub fn new(kubelet_port: u16, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .with_context(|| "Failed to build node metrics client")?;
        Ok(Self {
            kubelet_port,
            client,
        })
    }

    fn kubelet_url(&self, id: &NodeId, path: &str) -> String {
        format!("http://{}:{}{}", id.address, self.kubelet_port, path)
    }
}

#[async_trait]
impl NodeApi for KubeNodeApi {
    async fn machine_spec(&self, id: &NodeId) -> Result<Capacity> {
        let info = self
            .client
            .get(self.kubelet_url(id, "/spec"))
            .send()
            .await?
            .json::<MachineInfo>()
            .await
            .with_context(|| {
                format!(
                    "Getting machine spec for node {} with ip {} failed",
                    id.name, id.address
                )
            })?;
        Ok(Capacity {
            // Convert to milli-cores for consistency with the usage data.
            cpu: info.num_cores * 1000,
            memory: info.memory_capacity,
        })
    }

    async fn update_stats(&self, id: &NodeId) -> Result<Usage> {
        let stats = self
            .client
            .get(self.kubelet_url(id, "/stats"))
            .query(&[("num_stats", NUM_STATS_PER_UPDATE)])
            .send()
            .await?
            .json::<MachineStats>()
            .await
            .with_context(|| {
                format!(
                    "Updating stats for node {} with ip {} failed",
                    id.name, id.address
                )
            })?;
        let (cpu, memory) = percentile::reduce(&stats.stats);
        Ok(Usage {
            valid: true,
            cpu,
            memory,
        })
    }
}

/// Serves canned data for running without a live cluster.
pub struct FakeNodeApi;

#[async_trait]
impl NodeApi for FakeNodeApi {
    async fn machine_spec(&self, _id: &NodeId) -> Result<Capacity> {
        Ok(Capacity {
            cpu: 8000,
            memory: 8 * 1024 * 1024 * 1024,
        })
    }

    async fn update_stats(&self, _id: &NodeId) -> Result<Usage> {
        Ok(Usage {
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
        })
    }
}
