use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::{error, info, warn};

use crate::constants::{defaults, names, FINALIZER};
use crate::crds::{ClusterLogForwarder, ClusterLogging};
use crate::error::OperatorError;
use crate::metrics;
use crate::reconciler::{Reconciler, TickOutcome};

const CONTROLLER: &str = "clusterlogging";

/// Shared context for the ClusterLogging reconciler.
pub struct Context {
    pub client: Client,
    pub reconciler: Reconciler,
    /// Requeue interval of a healthy instance.
    pub requeue: Duration,
}

/// Start the ClusterLogging controller in `namespace`.
pub async fn run(ctx: Arc<Context>, namespace: &str) {
    let client = ctx.client.clone();
    let api: Api<ClusterLogging> = Api::namespaced(client.clone(), namespace);
    let forwarders: Api<ClusterLogForwarder> = Api::namespaced(client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    let deployments: Api<Deployment> = Api::namespaced(client, namespace);

    // Forwarder changes re-run the singleton instance.
    let ns = namespace.to_string();
    let to_instance = move |_: ClusterLogForwarder| {
        Some(ObjectRef::<ClusterLogging>::new(names::SINGLETON).within(&ns))
    };

    metrics::set_ready(true);
    Controller::new(api, watcher::Config::default())
        .watches(forwarders, watcher::Config::default(), to_instance)
        .owns(secrets, watcher::Config::default())
        .owns(configmaps, watcher::Config::default())
        .owns(services, watcher::Config::default())
        .owns(daemonsets, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((_obj, _action)) => {}
                Err(e) => {
                    error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;
}

/// Main reconciliation function.
async fn reconcile(cl: Arc<ClusterLogging>, ctx: Arc<Context>) -> Result<Action, OperatorError> {
    if cl.name_any() != names::SINGLETON {
        warn!(name = %cl.name_any(), "Only the instance named {} is reconciled", names::SINGLETON);
        return Ok(Action::await_change());
    }
    let namespace = cl.namespace().unwrap_or_else(|| defaults::NAMESPACE.into());
    let ns_api: Api<ClusterLogging> = Api::namespaced(ctx.client.clone(), &namespace);

    let started = Instant::now();
    let result = finalizer(&ns_api, FINALIZER, cl, |event| async {
        match event {
            Finalizer::Apply(cl) => apply(&ctx, &cl).await,
            Finalizer::Cleanup(cl) => cleanup(&ctx, &cl).await,
        }
    })
    .await
    .map_err(|e| OperatorError::Finalizer(e.to_string()));

    metrics::observe_reconcile_duration(CONTROLLER, started.elapsed().as_secs_f64());
    metrics::record_reconciliation(CONTROLLER, if result.is_ok() { "success" } else { "error" });
    result
}

/// Apply the desired state: one reconciler tick.
async fn apply(ctx: &Context, cl: &ClusterLogging) -> Result<Action, OperatorError> {
    info!(name = %cl.name_any(), "Reconciling ClusterLogging");

    match ctx.reconciler.reconcile(cl).await? {
        TickOutcome::Skipped => Ok(Action::await_change()),
        TickOutcome::Reconciled(report) if report.degraded => {
            info!(topology = %report.topology, "Forwarder is degraded");
            Ok(Action::requeue(Duration::from_secs(
                defaults::REQUEUE_DEGRADED_SECS,
            )))
        }
        TickOutcome::Reconciled(report) => {
            info!(
                topology = %report.topology,
                certificates_issued = report.certificates_issued,
                writes = report.deployed.writes,
                "ClusterLogging reconciled"
            );
            Ok(Action::requeue(ctx.requeue))
        }
    }
}

/// Cleanup on CR deletion.
async fn cleanup(ctx: &Context, cl: &ClusterLogging) -> Result<Action, OperatorError> {
    info!(name = %cl.name_any(), "Cleaning up ClusterLogging");

    // Owner references garbage-collect the rest; the topology is removed
    // explicitly so the collector stops before its secrets go away.
    ctx.reconciler.cleanup(cl).await?;
    Ok(Action::await_change())
}

/// Error policy: retry transient errors soon, permanent ones slowly.
fn error_policy(_cl: Arc<ClusterLogging>, error: &OperatorError, _ctx: Arc<Context>) -> Action {
    warn!("Reconciliation error: {error}");
    if error.is_transient() {
        Action::requeue(Duration::from_secs(defaults::REQUEUE_TRANSIENT_SECS))
    } else {
        Action::requeue(Duration::from_secs(defaults::REQUEUE_PERMANENT_SECS))
    }
}
