//! Cluster membership: which workers exist and where to reach them.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use resources::objects::node::NodeId;
use serde::Deserialize;
use tokio::{net, sync::Mutex};

/// Node lists younger than this are served from cache.
const CACHE_WINDOW: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_nodes_list(&self) -> Result<Vec<NodeId>>;
}

#[derive(Debug, Deserialize)]
struct MinionList {
    items: Vec<Minion>,
}

#[derive(Debug, Deserialize)]
struct Minion {
    id: String,
}

/// Lists workers from the orchestrator's read-only API and resolves their
/// addresses over DNS.
pub struct KubeCluster {
    master_url: String,
    client: Client,
    cache: Mutex<NodesCache>,
}

#[derive(Default)]
struct NodesCache {
    last_query: Option<Instant>,
    nodes: Vec<NodeId>,
}

impl KubeCluster {
    pub fn new(master_address: &str, request_timeout: Duration) -> Result<Self> {
        if master_address.is_empty() {
            bail!("Kubernetes master read-only API not specified");
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .with_context(|| "Failed to build cluster membership client")?;
        Ok(Self {
            master_url: format!("http://{}", master_address),
            client,
            cache: Mutex::new(NodesCache::default()),
        })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_nodes_list(&self) -> Result<Vec<NodeId>> {
        let mut cache = self.cache.lock().await;
        // Avoid refreshing the node list too often.
        if let Some(last_query) = cache.last_query {
            if last_query.elapsed() < CACHE_WINDOW {
                return Ok(cache.nodes.clone());
            }
        }

        let minions = self
            .client
            .get(format!("{}/api/v1beta1/minions", self.master_url))
            .send()
            .await?
            .json::<MinionList>()
            .await
            .with_context(|| "Failed to list minions from the master")?;

        let mut nodes = Vec::with_capacity(minions.items.len());
        for minion in minions.items {
            let host = minion.id.clone();
            let lookup_result = net::lookup_host((host.as_str(), 0)).await;
            match lookup_result {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => nodes.push(NodeId {
                        name: minion.id,
                        address: addr.ip().to_string(),
                    }),
                    None => {
                        tracing::error!("Skipping host {}: no address resolved", minion.id);
                    },
                },
                Err(err) => {
                    tracing::error!("Skipping host {} as IP lookup failed: {:#}", minion.id, err);
                },
            }
        }

        cache.last_query = Some(Instant::now());
        cache.nodes = nodes.clone();
        Ok(nodes)
    }
}

/// Fixed synthetic cluster for running without an orchestrator.
pub struct FakeCluster {
    nodes: Vec<NodeId>,
}

impl FakeCluster {
    pub fn new(cluster_size: usize) -> Self {
        let nodes = (0..cluster_size)
            .map(|i| NodeId {
                name: format!("minion-{}", i),
                address: format!("1.0.0.{}", i),
            })
            .collect();
        Self {
            nodes,
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_nodes_list(&self) -> Result<Vec<NodeId>> {
        Ok(self.nodes.clone())
    }
}
