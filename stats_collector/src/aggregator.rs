//! Periodic collection of stats from every node in the cluster.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use futures::future;
use resources::objects::{
    metrics::{Capacity, Usage},
    node::{NodeData, NodeId},
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{cluster::ClusterApi, node::NodeApi, rollup::NodeHistory};

/// Nodes not successfully polled for this long are presumed dead.
const STALENESS_LIMIT_HOURS: i64 = 1;

/// Maintains the hostname to [`NodeData`] table, polling every node once per
/// interval. Readers get value snapshots and never block a poll in progress.
pub struct Aggregator {
    inner: Arc<Inner>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    node_api: Arc<dyn NodeApi>,
    cluster_api: Arc<dyn ClusterApi>,
    poll_interval: Duration,
    nodes: RwLock<HashMap<String, NodeData>>,
    /// Window history backing the hour and day rollups. Touched only by the
    /// polling task.
    history: Mutex<HashMap<String, NodeHistory>>,
}

/// Outcome of the fan-out fetch for one node, applied under the write lock.
struct NodeFetch {
    name: String,
    capacity: Option<Capacity>,
    usage: Result<Usage>,
}

impl Aggregator {
    pub fn new(
        node_api: Arc<dyn NodeApi>,
        cluster_api: Arc<dyn ClusterApi>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_api,
                cluster_api,
                poll_interval,
                nodes: RwLock::new(HashMap::new()),
                history: Mutex::new(HashMap::new()),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Run the first update synchronously, then poll in the background, so
    /// the first read after `start` returns data.
    pub async fn start(&self) {
        self.inner.do_update().await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let start = time::Instant::now() + inner.poll_interval;
            let mut ticker = time::interval_at(start, inner.poll_interval);
            // An overlong tick skips the next one instead of queueing it.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.do_update().await,
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Exiting housekeeping");
        });

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.shutdown_tx = Some(shutdown_tx);
        lifecycle.handle = Some(handle);
    }

    /// Signal the polling task and wait for it to finish its current tick.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown_tx, handle) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (
                lifecycle.shutdown_tx.take().context("Aggregator is not running")?,
                lifecycle.handle.take().context("Aggregator is not running")?,
            )
        };
        let _ = shutdown_tx.send(()).await;
        handle.await.context("Polling task panicked")?;
        Ok(())
    }

    /// A read-consistent snapshot of the node table.
    pub async fn get_node_stats(&self) -> Result<HashMap<String, NodeData>> {
        Ok(self.inner.nodes.read().await.clone())
    }
}

impl Inner {
    async fn do_update(&self) {
        let nodes = match self.cluster_api.get_nodes_list().await {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!("Failed to detect nodes: {:#}", err);
                return;
            },
        };
        self.detect_nodes(nodes).await;
        self.update_stats().await;
    }

    async fn detect_nodes(&self, list: Vec<NodeId>) {
        let mut nodes = self.nodes.write().await;
        for id in list {
            if !nodes.contains_key(&id.name) {
                nodes.insert(id.name.clone(), NodeData::new(id));
            }
        }
    }

    async fn update_stats(&self) {
        // Snapshot targets so no lock is held across network calls.
        let targets: Vec<(NodeId, Capacity)> = self
            .nodes
            .read()
            .await
            .values()
            .map(|node| (node.id.clone(), node.capacity))
            .collect();

        let fetches = targets.into_iter().map(|(id, capacity)| async move {
            // Update capacity before usage.
            let capacity = if capacity.cpu == 0 {
                tracing::info!("Updating capacity for node {}", id.name);
                match self.node_api.machine_spec(&id).await {
                    Ok(capacity) => Some(capacity),
                    Err(err) => {
                        tracing::error!(
                            "Failed to update capacity for node {}: {:#}",
                            id.name,
                            err
                        );
                        None
                    },
                }
            } else {
                None
            };
            let usage = self.node_api.update_stats(&id).await;
            NodeFetch {
                name: id.name,
                capacity,
                usage,
            }
        });
        let results = future::join_all(fetches).await;

        let now = Local::now().naive_utc();
        let mut nodes = self.nodes.write().await;
        let mut history = self.history.lock().await;
        for fetch in results {
            match fetch.usage {
                Ok(usage) => {
                    if let Some(node) = nodes.get_mut(&fetch.name) {
                        if let Some(capacity) = fetch.capacity {
                            node.capacity = capacity;
                        }
                        node.stats.minute_usage = fix_cpu_usage(node.capacity, usage);
                        let node_history = history.entry(fetch.name).or_default();
                        node_history.push_minute(node.stats.minute_usage);
                        node.stats.hour_usage = node_history.hour_usage();
                        node.stats.day_usage = node_history.day_usage();
                        node.stats.last_update = now;
                    }
                },
                Err(err) => {
                    tracing::error!("Failed to update stats for node {}: {:#}", fetch.name, err);
                    let mut presumed_dead = false;
                    if let Some(node) = nodes.get_mut(&fetch.name) {
                        if let Some(capacity) = fetch.capacity {
                            node.capacity = capacity;
                        }
                        // Mark old data as stale.
                        node.stats.minute_usage.valid = false;
                        presumed_dead = now.signed_duration_since(node.stats.last_update)
                            > chrono::Duration::hours(STALENESS_LIMIT_HOURS);
                    }
                    if presumed_dead {
                        tracing::error!("Node {} presumed dead", fetch.name);
                        nodes.remove(&fetch.name);
                        history.remove(&fetch.name);
                    }
                },
            }
        }
    }
}

/// The timestamp and the cpu counter are not read atomically, so a rate can
/// exceed machine capacity by a fraction. Ceil it off.
fn fix_cpu_usage(capacity: Capacity, mut usage: Usage) -> Usage {
    usage.cpu.mean = usage.cpu.mean.min(capacity.cpu);
    usage.cpu.max = usage.cpu.max.min(capacity.cpu);
    usage.cpu.ninety = usage.cpu.ninety.min(capacity.cpu);
    usage
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Local;
    use resources::objects::metrics::Percentiles;

    use super::*;
    use crate::{
        cluster::FakeCluster,
        node::{FakeNodeApi, NodeApi},
    };

    fn fake_aggregator() -> Aggregator {
        Aggregator::new(
            Arc::new(FakeNodeApi),
            Arc::new(FakeCluster::new(10)),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn first_update_fills_the_table() {
        let aggregator = fake_aggregator();
        aggregator.inner.do_update().await;

        let nodes = aggregator.get_node_stats().await.unwrap();
        assert_eq!(nodes.len(), 10);
        let node = &nodes["minion-0"];
        assert_eq!(node.capacity.cpu, 8000);
        assert!(node.stats.minute_usage.valid);
        assert_eq!(node.stats.minute_usage.cpu.ninety, 123);
        // One summary is enough to open the hour window; a day needs more.
        assert!(node.stats.hour_usage.valid);
        assert!(!node.stats.day_usage.valid);
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let aggregator = fake_aggregator();
        aggregator.start().await;
        assert_eq!(aggregator.get_node_stats().await.unwrap().len(), 10);
        aggregator.stop().await.unwrap();
        assert!(aggregator.stop().await.is_err());
    }

    /// Reports usage above machine capacity.
    struct OverflowingNodeApi;

    #[async_trait]
    impl NodeApi for OverflowingNodeApi {
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
                    mean: 7990,
                    max: 9000,
                    ninety: 8021,
                },
                memory: Percentiles {
                    mean: 1,
                    max: 3,
                    ninety: 2,
                },
            })
        }
    }

    #[tokio::test]
    async fn cpu_percentiles_are_clamped_to_capacity() {
        let aggregator = Aggregator::new(
            Arc::new(OverflowingNodeApi),
            Arc::new(FakeCluster::new(1)),
            Duration::from_secs(60),
        );
        aggregator.inner.do_update().await;

        let nodes = aggregator.get_node_stats().await.unwrap();
        let usage = nodes["minion-0"].stats.minute_usage;
        assert_eq!(usage.cpu.mean, 7990);
        assert_eq!(usage.cpu.max, 8000);
        assert_eq!(usage.cpu.ninety, 8000);
    }

    /// Always fails the stats fetch.
    struct UnreachableNodeApi;

    #[async_trait]
    impl NodeApi for UnreachableNodeApi {
        async fn machine_spec(&self, _id: &NodeId) -> Result<Capacity> {
            bail!("connection refused")
        }

        async fn update_stats(&self, _id: &NodeId) -> Result<Usage> {
            bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn failed_poll_invalidates_then_staleness_evicts() {
        let aggregator = Aggregator::new(
            Arc::new(UnreachableNodeApi),
            Arc::new(FakeCluster::new(1)),
            Duration::from_secs(60),
        );

        // Freshly polled node: a failed fetch only marks it invalid.
        {
            let mut nodes = aggregator.inner.nodes.write().await;
            let mut node = NodeData::new(NodeId {
                name: "minion-0".to_string(),
                address: "1.0.0.0".to_string(),
            });
            node.stats.last_update = Local::now().naive_utc();
            node.stats.minute_usage.valid = true;
            nodes.insert("minion-0".to_string(), node);
        }
        aggregator.inner.do_update().await;
        let nodes = aggregator.get_node_stats().await.unwrap();
        assert!(!nodes["minion-0"].stats.minute_usage.valid);

        // Stale for over an hour: the node is dropped.
        {
            let mut nodes = aggregator.inner.nodes.write().await;
            nodes.get_mut("minion-0").unwrap().stats.last_update =
                Local::now().naive_utc() - chrono::Duration::minutes(61);
        }
        aggregator.inner.do_update().await;
        assert!(!aggregator
            .get_node_stats()
            .await
            .unwrap()
            .contains_key("minion-0"));
    }
}
