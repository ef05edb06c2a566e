//! One reconciliation tick of the logging subsystem.
//!
//! A tick runs strictly in order and aborts on the first failure:
//!
//! 1. the CA and every component secret,
//! 2. forwarder normalization and its persisted status,
//! 3. the collector configuration and the topology's workloads,
//! 4. the ClusterLogging status.
//!
//! A failed tick records the error on the ClusterLogging status and returns it
//! so the controller's error policy can requeue.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::{Client, ResourceExt};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::certs::{self, secret_definitions, CertificateAuthority, CertificateManager, KeyPolicy};
use crate::constants::names;
use crate::crds::cluster_logging::{CollectorStatus, ManagementState};
use crate::crds::common::{carry_transition_times, condition_types, Condition};
use crate::crds::{
    ClusterLogForwarder, ClusterLogForwarderSpec, ClusterLogForwarderStatus, ClusterLogging,
    ClusterLoggingStatus,
};
use crate::error::{OperatorError, Result};
use crate::forwarder::{fetch_referenced_secrets, normalize, NormalizeContext};
use crate::generator::CollectorKind;
use crate::metrics;
use crate::resources::owner_reference;
use crate::store::{retry_on_conflict, InMemoryStore, KubeStore, ObjectStore, RetryConfig};
use crate::topology::{CollectorPlan, Deployed, Images, Topology};

/// The stores a tick reads and writes, one per object kind.
#[derive(Clone)]
pub struct ClusterStores {
    pub cluster_loggings: Arc<dyn ObjectStore<ClusterLogging>>,
    pub forwarders: Arc<dyn ObjectStore<ClusterLogForwarder>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub daemon_sets: Arc<dyn ObjectStore<DaemonSet>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
}

impl ClusterStores {
    /// Stores backed by the API server, scoped to `namespace`.
    pub fn kube(client: Client, namespace: &str) -> Self {
        Self {
            cluster_loggings: Arc::new(KubeStore::<ClusterLogging>::new(client.clone(), namespace)),
            forwarders: Arc::new(KubeStore::<ClusterLogForwarder>::new(client.clone(), namespace)),
            secrets: Arc::new(KubeStore::<Secret>::new(client.clone(), namespace)),
            config_maps: Arc::new(KubeStore::<ConfigMap>::new(client.clone(), namespace)),
            services: Arc::new(KubeStore::<Service>::new(client.clone(), namespace)),
            daemon_sets: Arc::new(KubeStore::<DaemonSet>::new(client.clone(), namespace)),
            deployments: Arc::new(KubeStore::<Deployment>::new(client, namespace)),
        }
    }

    /// Empty process-local stores.
    pub fn in_memory() -> Self {
        Self {
            cluster_loggings: Arc::new(InMemoryStore::<ClusterLogging>::new()),
            forwarders: Arc::new(InMemoryStore::<ClusterLogForwarder>::new()),
            secrets: Arc::new(InMemoryStore::<Secret>::new()),
            config_maps: Arc::new(InMemoryStore::<ConfigMap>::new()),
            services: Arc::new(InMemoryStore::<Service>::new()),
            daemon_sets: Arc::new(InMemoryStore::<DaemonSet>::new()),
            deployments: Arc::new(InMemoryStore::<Deployment>::new()),
        }
    }
}

/// Static settings of the reconciler.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub namespace: String,
    pub key_policy: KeyPolicy,
    pub retry: RetryConfig,
    pub images: Images,
}

impl ReconcilerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key_policy: KeyPolicy::default(),
            retry: RetryConfig::default(),
            images: Images::default(),
        }
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The instance is `Unmanaged`; nothing was touched.
    Skipped,
    Reconciled(TickReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub topology: Topology,
    pub certificates_issued: usize,
    /// Forwarder elements were dropped or degraded.
    pub degraded: bool,
    pub deployed: Deployed,
    /// Collector pods not yet scheduled and the number desired, when any are missing.
    pub unscheduled: Option<(i32, i32)>,
}

pub struct Reconciler {
    stores: ClusterStores,
    config: ReconcilerConfig,
    /// CA from the previous tick; reused while the CA secret still matches it.
    ca: Mutex<Option<CertificateAuthority>>,
}

impl Reconciler {
    pub fn new(stores: ClusterStores, config: ReconcilerConfig) -> Self {
        Self {
            stores,
            config,
            ca: Mutex::new(None),
        }
    }

    pub fn stores(&self) -> &ClusterStores {
        &self.stores
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one tick for `cluster`.
    pub async fn reconcile(&self, cluster: &ClusterLogging) -> Result<TickOutcome> {
        if cluster.spec.management_state == ManagementState::Unmanaged {
            info!(name = %cluster.name_any(), "Instance is unmanaged, skipping");
            return Ok(TickOutcome::Skipped);
        }

        match self.tick(cluster, certs::now()).await {
            Ok(report) => {
                let status = success_status(cluster, &report);
                self.write_status(&cluster.name_any(), status).await?;
                Ok(TickOutcome::Reconciled(report))
            }
            Err(e) => {
                let status = failure_status(cluster, &e);
                if let Err(status_err) = self.write_status(&cluster.name_any(), status).await {
                    warn!(error = %status_err, "Failed to record reconcile failure");
                }
                Err(e)
            }
        }
    }

    /// Remove the deployed topology's objects.
    pub async fn cleanup(&self, cluster: &ClusterLogging) -> Result<()> {
        let topology = Topology::deployed(cluster).unwrap_or_else(|| Topology::requested(cluster));
        topology.undeploy(&self.stores).await?;
        Ok(())
    }

    async fn tick(&self, cluster: &ClusterLogging, now: OffsetDateTime) -> Result<TickReport> {
        let namespace = self.config.namespace.as_str();
        let retry = &self.config.retry;
        let owner = owner_reference(cluster);

        // 1. Certificates
        let certificates_issued = {
            let mut cached = self.ca.lock().await;
            let manager = CertificateManager::new(
                self.stores.secrets.as_ref(),
                namespace,
                &self.config.key_policy,
                retry,
            )
            .with_owner(owner.clone());

            let mut ca = manager.ensure_ca(cached.as_ref(), now).await?;
            let mut issued = 0;
            for def in secret_definitions() {
                issued += manager.reconcile_secret(&mut ca, def.name, now).await?.issued;
            }
            *cached = Some(ca);
            issued
        };
        metrics::record_certificates_issued(certificates_issued);

        // 2. Forwarder
        let forwarder = self.stores.forwarders.get(names::SINGLETON).await?;
        let spec = forwarder
            .as_ref()
            .map(|f| f.spec.clone())
            .unwrap_or_else(ClusterLogForwarderSpec::default);
        let secret_index = fetch_referenced_secrets(&spec, self.stores.secrets.as_ref()).await?;
        let normalized = normalize(
            &spec,
            &NormalizeContext::for_cluster(cluster, namespace, &secret_index),
        );
        publish_forwarder_metrics(&normalized.status);
        let degraded = normalized
            .status
            .condition(condition_types::DEGRADED)
            .is_some_and(Condition::is_true);
        if let Some(forwarder) = &forwarder {
            let mut status = normalized.status.clone();
            status.observed_generation = forwarder.metadata.generation;
            self.write_forwarder_status(status).await?;
        }

        // 3. Collector configuration and workloads
        let requested = Topology::requested(cluster);
        if let Some(previous) = Topology::deployed(cluster).filter(|p| *p != requested) {
            info!(from = %previous, to = %requested, "Forwarding topology changed");
            previous.undeploy(&self.stores).await?;
        }
        let fluentd = cluster.fluentd_spec();
        let plan = CollectorPlan {
            namespace,
            forwarder: &normalized.spec,
            kind: CollectorKind::from(cluster.collector_type()),
            fluentd: &fluentd,
            images: &self.config.images,
            owner,
        };
        let deployed = requested.reconcile(&self.stores, &plan, retry).await?;
        let collector = self.stores.daemon_sets.get(deployed.daemon_set).await?;
        let unscheduled = unscheduled_pods(collector.as_ref());
        if let Some((missing, desired)) = unscheduled {
            warn!(missing, desired, "Collector pods are not scheduled");
        }

        Ok(TickReport {
            topology: requested,
            certificates_issued,
            degraded,
            deployed,
            unscheduled,
        })
    }

    async fn write_forwarder_status(&self, desired: ClusterLogForwarderStatus) -> Result<()> {
        let store = self.stores.forwarders.as_ref();
        let stamp = now_rfc3339();
        let desired = &desired;
        let stamp = stamp.as_str();
        retry_on_conflict(
            &self.config.retry,
            "update ClusterLogForwarder status",
            || async move {
                let Some(mut live) = store.get(names::SINGLETON).await? else {
                    return Ok(());
                };
                let previous = live.status.clone().unwrap_or_default();
                let mut next = desired.clone();
                next.conditions = carry_transition_times(&previous.conditions, next.conditions, stamp);
                if live.status.as_ref() == Some(&next) {
                    debug!("Forwarder status is current");
                    return Ok(());
                }
                live.status = Some(next);
                store.update_status(&live).await?;
                Ok(())
            },
        )
        .await?;
        Ok(())
    }

    async fn write_status(&self, name: &str, desired: ClusterLoggingStatus) -> Result<()> {
        let store = self.stores.cluster_loggings.as_ref();
        let stamp = now_rfc3339();
        let desired = &desired;
        let stamp = stamp.as_str();
        retry_on_conflict(
            &self.config.retry,
            "update ClusterLogging status",
            || async move {
                let Some(mut live) = store.get(name).await? else {
                    return Ok(());
                };
                let previous = live.status.clone().unwrap_or_default();
                let mut next = desired.clone();
                next.conditions = carry_transition_times(&previous.conditions, next.conditions, stamp);
                if live.status.as_ref() == Some(&next) {
                    debug!(name = %name, "Status is current");
                    return Ok(());
                }
                live.status = Some(next);
                store.update_status(&live).await?;
                Ok(())
            },
        )
        .await?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn publish_forwarder_metrics(status: &ClusterLogForwarderStatus) {
    metrics::set_forwarder_elements("input", status.inputs.values().map(|e| &e.state));
    metrics::set_forwarder_elements("output", status.outputs.values().map(|e| &e.state));
    metrics::set_forwarder_elements("pipeline", status.pipelines.values().map(|e| &e.state));
}

/// Collector pods the DaemonSet could not place, with the desired count.
fn unscheduled_pods(daemon_set: Option<&DaemonSet>) -> Option<(i32, i32)> {
    let status = daemon_set?.status.as_ref()?;
    let missing = status.desired_number_scheduled - status.current_number_scheduled;
    (missing > 0).then_some((missing, status.desired_number_scheduled))
}

fn success_status(cluster: &ClusterLogging, report: &TickReport) -> ClusterLoggingStatus {
    let degraded = if report.degraded {
        Condition::new(
            condition_types::DEGRADED,
            true,
            "ForwarderDegraded",
            "some forwarder inputs, outputs or pipelines were dropped or degraded",
        )
    } else {
        Condition::new(condition_types::DEGRADED, false, "Reconciled", "")
    };
    // Informational only; Ready does not depend on it.
    let unschedulable = match report.unscheduled {
        Some((missing, desired)) => Condition::new(
            condition_types::UNSCHEDULABLE,
            true,
            "CollectorPodsUnschedulable",
            format!("{missing} of {desired} collector pods are not scheduled"),
        ),
        None => Condition::new(condition_types::UNSCHEDULABLE, false, "Scheduled", ""),
    };
    ClusterLoggingStatus {
        topology: Some(report.topology.as_str().to_string()),
        collector: Some(CollectorStatus {
            daemon_set: Some(report.deployed.daemon_set.to_string()),
            config_hash: Some(report.deployed.config_hash.clone()),
        }),
        observed_generation: cluster.metadata.generation,
        conditions: vec![
            Condition::new(condition_types::READY, true, "Reconciled", "collector is deployed"),
            degraded,
            unschedulable,
        ],
    }
}

/// Previous status with the error recorded; the deployed topology is unchanged.
fn failure_status(cluster: &ClusterLogging, error: &OperatorError) -> ClusterLoggingStatus {
    let previous = cluster.status.clone().unwrap_or_default();
    ClusterLoggingStatus {
        conditions: vec![
            Condition::new(condition_types::READY, false, error.reason(), error.to_string()),
            Condition::new(condition_types::DEGRADED, true, error.reason(), error.to_string()),
        ],
        ..previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ClusterLoggingSpec;

    fn cluster() -> ClusterLogging {
        let mut cluster = ClusterLogging::new(names::SINGLETON, ClusterLoggingSpec::default());
        cluster.metadata.generation = Some(3);
        cluster
    }

    fn report() -> TickReport {
        TickReport {
            topology: Topology::CentralNormalization,
            certificates_issued: 0,
            degraded: true,
            deployed: Deployed {
                daemon_set: "fluentbit",
                config_hash: "abc".into(),
                writes: 0,
            },
            unscheduled: None,
        }
    }

    #[test]
    fn test_success_status() {
        let status = success_status(&cluster(), &report());
        assert_eq!(status.topology.as_deref(), Some("centralNormalization"));
        assert_eq!(status.observed_generation, Some(3));
        let collector = status.collector.unwrap();
        assert_eq!(collector.daemon_set.as_deref(), Some("fluentbit"));
        assert_eq!(collector.config_hash.as_deref(), Some("abc"));
        assert!(status.conditions[0].is_true());
        assert_eq!(status.conditions[1].reason.as_deref(), Some("ForwarderDegraded"));
    }

    #[test]
    fn test_unschedulable_condition() {
        use k8s_openapi::api::apps::v1::DaemonSetStatus;

        let status = success_status(&cluster(), &report());
        assert_eq!(status.conditions[2].type_, condition_types::UNSCHEDULABLE);
        assert!(!status.conditions[2].is_true());

        let mut daemon_set = DaemonSet::default();
        assert_eq!(unscheduled_pods(Some(&daemon_set)), None);
        daemon_set.status = Some(DaemonSetStatus {
            desired_number_scheduled: 3,
            current_number_scheduled: 1,
            ..Default::default()
        });
        assert_eq!(unscheduled_pods(Some(&daemon_set)), Some((2, 3)));
        assert_eq!(unscheduled_pods(None), None);

        let report = TickReport {
            unscheduled: Some((2, 3)),
            ..report()
        };
        let status = success_status(&cluster(), &report);
        assert!(status.conditions[0].is_true());
        assert!(status.conditions[2].is_true());
        assert_eq!(
            status.conditions[2].message.as_deref(),
            Some("2 of 3 collector pods are not scheduled")
        );
    }

    #[test]
    fn test_failure_status_keeps_deployed_topology() {
        let mut cluster = cluster();
        cluster.status = Some(success_status(&cluster, &report()));

        let status = failure_status(&cluster, &OperatorError::Config("bad".into()));
        assert_eq!(status.topology.as_deref(), Some("centralNormalization"));
        assert!(!status.conditions[0].is_true());
        assert_eq!(status.conditions[0].reason.as_deref(), Some("InvalidConfiguration"));
        assert!(status.conditions[1].is_true());
    }
}
