use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Json, Router};
use axum_macros::debug_handler;
use clap::Parser;
use resources::{models::ErrResponse, objects::node::NodeData, utils::parse_duration};

use crate::{
    aggregator::Aggregator,
    cluster::{ClusterApi, FakeCluster, KubeCluster},
    node::{FakeNodeApi, KubeNodeApi, NodeApi},
};

mod aggregator;
mod cluster;
mod node;
mod percentile;
mod rollup;

/// Size of the synthetic cluster served in fake mode.
const FAKE_CLUSTER_SIZE: usize = 10;

#[derive(Parser)]
#[clap(author, version, about = "Cluster-wide node stats collector", long_about = None)]
struct Args {
    /// The IP address for serving stats.
    #[clap(long, default_value = "0.0.0.0")]
    address: String,
    /// The port to listen on for connections.
    #[clap(long, default_value_t = 8085)]
    port: u16,
    /// Use fake services.
    #[clap(long)]
    fake: bool,
    /// Interval between polling stats for a node.
    #[clap(long, default_value = "1m", parse(try_from_str = parse_duration))]
    poll_interval: Duration,
    /// Address of the kubernetes master read-only API.
    #[clap(long)]
    kubernetes_master_readonly: Option<String>,
    /// Kubelet port used for retrieving node stats.
    #[clap(long, default_value_t = 10250)]
    kubelet_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    tracing::info!(
        "Running with fake={} on {}:{}",
        args.fake,
        args.address,
        args.port
    );

    // Keep requests well inside the poll interval so a hung node cannot
    // stretch a tick past its period.
    let request_timeout = args.poll_interval / 4;
    let (cluster_api, node_api): (Arc<dyn ClusterApi>, Arc<dyn NodeApi>) = if args.fake {
        (
            Arc::new(FakeCluster::new(FAKE_CLUSTER_SIZE)),
            Arc::new(FakeNodeApi),
        )
    } else {
        let master = args
            .kubernetes_master_readonly
            .as_deref()
            .with_context(|| "Kubernetes master read-only API not specified")?;
        (
            Arc::new(KubeCluster::new(master, request_timeout)?),
            Arc::new(KubeNodeApi::new(args.kubelet_port, request_timeout)?),
        )
    };

    let aggregator = Arc::new(Aggregator::new(node_api, cluster_api, args.poll_interval));
    aggregator.start().await;

    let app = Router::new()
        .route("/stats", get(stats))
        .layer(Extension(aggregator.clone()));
    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.address, args.port))?;

    tracing::info!("Listening at {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown())
        .await?;

    aggregator.stop().await?;
    Ok(())
}

#[debug_handler]
async fn stats(
    Extension(aggregator): Extension<Arc<Aggregator>>,
) -> Result<Json<HashMap<String, NodeData>>, ErrResponse> {
    let nodes = aggregator.get_node_stats().await.map_err(|err| {
        ErrResponse::new(
            String::from("Failed to get node stats"),
            Some(err.to_string()),
        )
    })?;
    Ok(Json(nodes))
}

async fn shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("expect tokio signal ctrl-c");
    tracing::info!("Shutting Down");
}
