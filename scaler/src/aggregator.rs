//! Client for the stats collector's aggregated node view.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use resources::objects::{
    metrics::Resource,
    node::{DerivedStats, NodeData},
};

use crate::utils::validate_hostport;

/// One node as seen through the aggregator.
#[derive(Debug, Clone)]
pub struct Node {
    pub hostname: String,
    pub capacity: Resource,
    pub usage: DerivedStats,
}

#[async_trait]
pub trait AggregatorApi: Send + Sync {
    /// A map of hostname to node, for all the hosts in the cluster.
    async fn get_cluster_info(&self) -> Result<HashMap<String, Node>>;
}

pub struct AggregatorClient {
    hostport: String,
    client: Client,
}

impl AggregatorClient {
    pub fn new(hostport: &str) -> Result<Self> {
        validate_hostport(hostport).with_context(|| "aggregator host:port invalid")?;
        Ok(Self {
            hostport: hostport.to_string(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl AggregatorApi for AggregatorClient {
    async fn get_cluster_info(&self) -> Result<HashMap<String, Node>> {
        let url = format!("http://{}/stats", self.hostport);
        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .json::<HashMap<String, NodeData>>()
            .await
            .with_context(|| format!("Invalid response from aggregator at {}", url))?;

        let nodes = response
            .into_iter()
            .map(|(hostname, data)| {
                let node = Node {
                    hostname: hostname.clone(),
                    capacity: Resource {
                        cpu: data.capacity.cpu,
                        memory: data.capacity.memory,
                    },
                    usage: data.stats,
                };
                (hostname, node)
            })
            .collect();
        Ok(nodes)
    }
}
