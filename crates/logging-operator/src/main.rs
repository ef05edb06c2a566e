//! Kubernetes operator for cluster logging.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use logging_operator::config::OperatorConfig;
use logging_operator::controllers::cluster_logging_controller::{self, Context};
use logging_operator::metrics;
use logging_operator::reconciler::{ClusterStores, Reconciler};
use logging_operator::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = OperatorConfig::parse();
    telemetry::init(&config.log_level);
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    info!(namespace = %config.namespace, "Starting cluster logging operator");

    let client = kube::Client::try_default().await?;

    let metrics_addr = config.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr).await {
            error!("Metrics server failed: {e}");
        }
    });

    let stores = ClusterStores::kube(client.clone(), &config.namespace);
    let ctx = Arc::new(Context {
        client,
        reconciler: Reconciler::new(stores, config.reconciler_config()),
        requeue: config.requeue(),
    });

    cluster_logging_controller::run(ctx, &config.namespace).await;
    info!("Controller stopped");
    Ok(())
}
