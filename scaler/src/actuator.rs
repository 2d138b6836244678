//! Client for the provisioner service that creates worker nodes.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use resources::objects::metrics::Resource;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{shapes::NodeShapes, utils::validate_hostport};

#[async_trait]
pub trait ActuatorApi: Send + Sync {
    /// All the node shapes available for this cluster.
    async fn get_node_shapes(&self) -> Result<NodeShapes>;
    /// The default node shape's type name.
    async fn get_default_node_shape(&self) -> Result<String>;
    /// Create one node of the given shape and return its hostname.
    async fn create_node(&self, shape_name: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ShapeInfo {
    capacity: Resource,
}

#[derive(Debug, Serialize)]
struct AddInstancesRequest {
    instance_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    name: String,
}

pub struct Actuator {
    hostport: String,
    client: Client,
}

impl Actuator {
    pub fn new(hostport: &str) -> Result<Self> {
        validate_hostport(hostport).with_context(|| "actuator host:port invalid")?;
        Ok(Self {
            hostport: hostport.to_string(),
            client: Client::new(),
        })
    }

    // The provisioner speaks POST for everything, body or not.
    async fn post<B, R>(&self, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("http://{}{}", self.hostport, path);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await?
            .json::<R>()
            .await
            .with_context(|| format!("Invalid response from actuator at {}", url))
    }
}

#[async_trait]
impl ActuatorApi for Actuator {
    async fn get_node_shapes(&self) -> Result<NodeShapes> {
        let catalog: BTreeMap<String, ShapeInfo> =
            self.post::<(), _>("/instance_types", None).await?;
        if catalog.is_empty() {
            bail!("no node shapes returned by actuator");
        }
        Ok(NodeShapes::from_catalog(
            catalog
                .into_iter()
                .map(|(name, info)| (name, info.capacity))
                .collect(),
        ))
    }

    async fn get_default_node_shape(&self) -> Result<String> {
        let shape: String = self.post::<(), _>("/instance_types/default", None).await?;
        if shape.is_empty() {
            bail!("default node shape returned by actuator is empty");
        }
        Ok(shape)
    }

    async fn create_node(&self, shape_name: &str) -> Result<String> {
        let request = AddInstancesRequest {
            instance_types: vec![shape_name.to_string()],
        };
        let mut instances: Vec<Instance> = self.post("/instances", Some(&request)).await?;
        if instances.len() != 1 {
            bail!("invalid response from the actuator: {:?}", instances);
        }
        Ok(instances.remove(0).name)
    }
}
