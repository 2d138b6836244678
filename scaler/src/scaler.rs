//! The autoscaler's housekeeping loop.

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use resources::objects::shape::NodeShape;

use crate::{
    actuator::ActuatorApi,
    aggregator::{AggregatorApi, Node},
    cluster::{Cluster, ClusterNode},
    policy::{ClusterUsagePolicy, Horizon, Policy},
    shapes::NodeShapes,
};

pub struct AutoScaler {
    /// Policies in increasing priority order.
    policies: Vec<(String, Box<dyn Policy>)>,
    node_shapes: NodeShapes,
    default_shape: NodeShape,
    actuator: Box<dyn ActuatorApi>,
    aggregator: Box<dyn AggregatorApi>,
    housekeeping_tick: Duration,
    /// Hostnames of nodes we created, by shape name, so later ticks can
    /// watch them rejoin the aggregator's view.
    new_nodes: HashMap<String, String>,
}

impl AutoScaler {
    pub async fn new(
        housekeeping_tick: Duration,
        actuator: Box<dyn ActuatorApi>,
        aggregator: Box<dyn AggregatorApi>,
        scaling_policy: Horizon,
        threshold: u64,
    ) -> Result<Self> {
        let node_shapes = actuator
            .get_node_shapes()
            .await
            .with_context(|| "failed to get existing node shapes")?;
        tracing::debug!("Available node shapes: {:?}", node_shapes);

        let default_name = actuator
            .get_default_node_shape()
            .await
            .with_context(|| "failed to get default node shape")?;
        let default_shape = node_shapes.with_name(&default_name)?.clone();
        tracing::debug!("Default node shape: {:?}", default_shape);

        let cluster_policy = ClusterUsagePolicy::new(threshold, scaling_policy)?;
        let policies: Vec<(String, Box<dyn Policy>)> =
            vec![("ClusterUsage".to_string(), Box::new(cluster_policy))];

        Ok(Self {
            policies,
            node_shapes,
            default_shape,
            actuator,
            aggregator,
            housekeeping_tick,
            new_nodes: HashMap::new(),
        })
    }

    /// Housekeep forever. Tick errors are logged and the next tick retries;
    /// only ctrl-c breaks the loop.
    pub async fn auto_scale(&mut self) -> Result<()> {
        tracing::info!("Autoscaler started");
        loop {
            if let Err(err) = self.do_housekeeping().await {
                tracing::error!("{:#}", err);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.housekeeping_tick) => {},
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Autoscaler exiting");
                    break;
                },
            }
        }
        Ok(())
    }

    async fn do_housekeeping(&mut self) -> Result<()> {
        let nodes = self
            .aggregator
            .get_cluster_info()
            .await
            .with_context(|| "failed to get cluster node information from aggregator")?;

        let cluster = self.apply_policies(nodes)?;
        self.handle_cluster_resizing(&cluster).await?;
        Ok(())
    }

    fn apply_policies(&self, nodes: HashMap<String, Node>) -> Result<Cluster> {
        let mut cluster = Cluster::new(self.node_shapes.clone(), self.default_shape.clone());
        for (hostname, node) in nodes {
            // Configuration drift: the node's reported capacity fits no
            // catalog shape. Leave it out of this tick.
            let shape = match self.node_shapes.with_capacity(node.capacity) {
                Ok(shape) => shape,
                Err(err) => {
                    tracing::error!("Skipping node {}: {:#}", hostname, err);
                    continue;
                },
            };
            cluster.current.insert(
                hostname,
                ClusterNode {
                    shape_name: shape.name.clone(),
                    node,
                },
            );
        }

        for (title, policy) in &self.policies {
            tracing::debug!("Applying policy {}", title);
            policy
                .perform_scaling(&mut cluster)
                .with_context(|| format!("policy {} failed", title))?;
        }
        Ok(cluster)
    }

    async fn handle_cluster_resizing(&mut self, cluster: &Cluster) -> Result<()> {
        for shape_name in &cluster.new {
            let hostname = self
                .actuator
                .create_node(shape_name)
                .await
                .with_context(|| format!("failed to create node with shape {}", shape_name))?;
            tracing::info!("Created node {} with shape {}", hostname, shape_name);
            self.new_nodes.insert(hostname, shape_name.clone());
        }
        Ok(())
    }
}
