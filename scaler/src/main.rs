use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use resources::utils::parse_duration;

use crate::{
    actuator::Actuator, aggregator::AggregatorClient, policy::Horizon, scaler::AutoScaler,
};

mod actuator;
mod aggregator;
mod cluster;
mod policy;
mod scaler;
mod shapes;
mod utils;

#[derive(Parser)]
#[clap(author, version, about = "Cluster autoscaler", long_about = None)]
struct Args {
    /// Housekeeping duration.
    #[clap(long, default_value = "1m", parse(try_from_str = parse_duration))]
    housekeeping: Duration,
    /// Percentage of cluster resource usage beyond which the cluster size
    /// will be increased.
    #[clap(long, default_value_t = 90)]
    cluster_threshold: u64,
    /// Scale on usage over the last minute (aggressive), hour (moderate) or
    /// day (conservative).
    #[clap(long, arg_enum, default_value_t = Horizon::Hour)]
    cluster_scaling_policy: Horizon,
    /// Actuator host:port.
    #[clap(long, default_value = "localhost:8080")]
    actuator_hostport: String,
    /// Aggregator host:port.
    #[clap(long, default_value = "localhost:8085")]
    aggregator_hostport: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let actuator = Actuator::new(&args.actuator_hostport)?;
    let aggregator = AggregatorClient::new(&args.aggregator_hostport)?;
    let mut scaler = AutoScaler::new(
        args.housekeeping,
        Box::new(actuator),
        Box::new(aggregator),
        args.cluster_scaling_policy,
        args.cluster_threshold,
    )
    .await?;

    scaler.auto_scale().await
}
