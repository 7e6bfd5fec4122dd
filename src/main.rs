//! Mutant detector - ReplicaSet image drift controller

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use mutant_detector::controller::{error_policy, reconcile, Context};
use mutant_detector::telemetry::{init_telemetry, TelemetryConfig};
use mutant_detector::{CONTROLLER_NAME, DEFAULT_NAMESPACE};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Flags ReplicaSets whose pods run diverging container images
#[derive(Parser, Debug)]
#[command(name = "mutant-detector", version, about, long_about = None)]
struct Cli {
    /// Namespace whose ReplicaSets and pods are watched
    #[arg(
        short,
        long,
        env = "MUTANT_DETECTOR_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        conflicts_with = "all_namespaces"
    )]
    namespace: String,

    /// Watch ReplicaSets and pods in every namespace
    #[arg(short = 'A', long, env = "MUTANT_DETECTOR_ALL_NAMESPACES")]
    all_namespaces: bool,

    /// Field manager recorded on ReplicaSet updates
    #[arg(long, env = "MUTANT_DETECTOR_CONTROLLER_NAME", default_value = CONTROLLER_NAME)]
    controller_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: cli.controller_name.clone(),
        ..Default::default()
    })?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let (replica_sets, pods): (Api<ReplicaSet>, Api<Pod>) = if cli.all_namespaces {
        tracing::info!("Watching ReplicaSets in all namespaces");
        (Api::all(client.clone()), Api::all(client.clone()))
    } else {
        tracing::info!(namespace = %cli.namespace, "Watching ReplicaSets");
        (
            Api::namespaced(client.clone(), &cli.namespace),
            Api::namespaced(client.clone(), &cli.namespace),
        )
    };

    let ctx = Arc::new(Context::new(client, cli.controller_name.clone()));

    tracing::info!(controller = %cli.controller_name, "Starting mutant detector");

    // Pod events enqueue the ReplicaSet that controls the pod
    Controller::new(
        replica_sets,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(pods, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
        match result {
            Ok((obj, action)) => {
                tracing::debug!(replicaset = %obj, ?action, "ReplicaSet reconciliation completed");
            }
            Err(e) => {
                tracing::debug!(error = %e, "ReplicaSet reconciliation error");
            }
        }
    })
    .await;

    tracing::info!("Mutant detector shutting down");
    Ok(())
}
