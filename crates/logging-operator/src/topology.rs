//! Forwarding topologies: which workloads collect logs and where fluentd runs.
//!
//! * `edgeNormalization`: a fluentd DaemonSet tails node logs and ships them.
//! * `enhancedEdgeNormalization`: fluent-bit tails node logs inside the
//!   collector pod and forwards to the fluentd container next to it.
//! * `centralNormalization`: a fluent-bit DaemonSet forwards to a fluentd
//!   Deployment behind the `normalizer` Service.
//!
//! The deployed variant is kept in the ClusterLogging status. When the
//! annotation selects a different one, the old variant is undeployed before
//! the new one is reconciled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Container, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::constants::{annotations, keys, names, paths, ports, values};
use crate::crds::cluster_logging::FluentdSpec;
use crate::crds::{ClusterLogForwarderSpec, ClusterLogging};
use crate::error::Result;
use crate::generator::{self, fluentbit, CollectorKind, Ingest};
use crate::reconciler::ClusterStores;
use crate::resources::configmap_builder::build_config_configmap;
use crate::resources::daemonset_builder::build_daemonset;
use crate::resources::deployment_builder::build_deployment;
use crate::resources::pod_builder::{
    build_container, build_pod_template, config_map_volume, empty_dir_volume, host_path_volume,
    secret_volume, ContainerParams, Mount,
};
use crate::resources::service_builder::build_component_service;
use crate::resources::{component_labels, content_hash, upsert};
use crate::store::{delete_if_present, RetryConfig, StoreError};

/// Replicas of the central normalizer Deployment.
pub const NORMALIZER_REPLICAS: i32 = 4;

const CONFIG_VOLUME: &str = "config";
const FLUENTBIT_VOLUME: &str = "fluentbit-config";
const CERTS_VOLUME: &str = "collector-metrics";
const VARLOG_VOLUME: &str = "varlog";
const BUFFER_VOLUME: &str = "filebufferstorage";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    #[default]
    EdgeNormalization,
    EnhancedEdgeNormalization,
    CentralNormalization,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::EdgeNormalization => "edgeNormalization",
            Topology::EnhancedEdgeNormalization => "enhancedEdgeNormalization",
            Topology::CentralNormalization => "centralNormalization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "edgeNormalization" => Some(Topology::EdgeNormalization),
            "enhancedEdgeNormalization" => Some(Topology::EnhancedEdgeNormalization),
            "centralNormalization" => Some(Topology::CentralNormalization),
            _ => None,
        }
    }

    /// Topology requested by the annotation; unknown values fall back to edge.
    pub fn requested(cluster: &ClusterLogging) -> Self {
        match cluster.annotations().get(annotations::TOPOLOGY) {
            None => Topology::default(),
            Some(value) => Self::parse(value).unwrap_or_else(|| {
                warn!(value = %value, "Unknown forwarding topology, using edgeNormalization");
                Topology::default()
            }),
        }
    }

    /// Topology recorded as deployed in the status.
    pub fn deployed(cluster: &ClusterLogging) -> Option<Self> {
        cluster
            .status
            .as_ref()
            .and_then(|s| s.topology.as_deref())
            .and_then(Self::parse)
    }

    /// Name of the DaemonSet collecting node logs.
    pub fn collector_daemonset(&self) -> &'static str {
        match self {
            Topology::CentralNormalization => names::FLUENTBIT,
            _ => names::COLLECTOR,
        }
    }

    fn ingest(&self) -> Ingest {
        match self {
            Topology::EdgeNormalization => Ingest::Tail,
            _ => Ingest::Forward {
                port: ports::NORMALIZER_FORWARD,
            },
        }
    }

    /// ConfigMaps carrying the fluentd and fluent-bit configuration.
    pub fn render(&self, plan: &CollectorPlan<'_>) -> Result<Rendered> {
        let fluentd_files = generator::collector_files(
            plan.forwarder,
            plan.kind,
            plan.namespace,
            self.ingest(),
        )?;

        let mut config_maps = Vec::new();
        let fluentbit_files = match self {
            Topology::EdgeNormalization => None,
            Topology::EnhancedEdgeNormalization => Some(fluentbit::collector_files(
                "127.0.0.1",
                ports::NORMALIZER_FORWARD,
            )),
            Topology::CentralNormalization => Some(fluentbit::collector_files(
                &format!("{}.{}.svc", names::NORMALIZER, plan.namespace),
                ports::NORMALIZER_FORWARD,
            )),
        };
        let config_hash = content_hash(&(&fluentd_files, &fluentbit_files))?;

        let (fluentd_name, fluentd_component) = match self {
            Topology::CentralNormalization => (names::NORMALIZER, values::COMPONENT_NORMALIZER),
            _ => (names::COLLECTOR_CONFIG, values::COMPONENT_COLLECTOR),
        };
        config_maps.push(build_config_configmap(
            fluentd_name,
            plan.namespace,
            fluentd_component,
            fluentd_files,
            plan.owner.clone(),
        ));
        if let Some(files) = fluentbit_files {
            config_maps.push(build_config_configmap(
                names::FLUENTBIT,
                plan.namespace,
                values::COMPONENT_COLLECTOR,
                files,
                plan.owner.clone(),
            ));
        }

        Ok(Rendered {
            config_maps,
            config_hash,
        })
    }

    /// Write the configuration and workloads of this topology.
    pub async fn reconcile(
        &self,
        stores: &ClusterStores,
        plan: &CollectorPlan<'_>,
        retry: &RetryConfig,
    ) -> Result<Deployed> {
        let rendered = self.render(plan)?;
        let mut writes = 0;

        // 1. Configuration
        for cm in &rendered.config_maps {
            writes += usize::from(upsert(stores.config_maps.as_ref(), cm, retry).await?.wrote());
        }

        // 2. Services
        let service = match self {
            Topology::CentralNormalization => build_component_service(
                names::NORMALIZER,
                plan.namespace,
                values::COMPONENT_NORMALIZER,
                &[
                    ("forward", ports::NORMALIZER_FORWARD),
                    ("metrics", ports::COLLECTOR_METRICS),
                ],
                plan.owner.clone(),
            )?,
            _ => build_component_service(
                names::COLLECTOR,
                plan.namespace,
                values::COMPONENT_COLLECTOR,
                &[("metrics", ports::COLLECTOR_METRICS)],
                plan.owner.clone(),
            )?,
        };
        writes += usize::from(upsert(stores.services.as_ref(), &service, retry).await?.wrote());

        // 3. Workloads
        let workloads = Workloads {
            plan,
            config_hash: &rendered.config_hash,
        };
        match self {
            Topology::EdgeNormalization => {
                let template = workloads.pod(
                    values::COMPONENT_COLLECTOR,
                    vec![workloads.fluentd_container(true)],
                    workloads.fluentd_volumes(names::COLLECTOR_CONFIG, true)?,
                );
                let ds = build_daemonset(
                    names::COLLECTOR,
                    plan.namespace,
                    values::COMPONENT_COLLECTOR,
                    template,
                    plan.owner.clone(),
                )?;
                writes += usize::from(upsert(stores.daemon_sets.as_ref(), &ds, retry).await?.wrote());
            }
            Topology::EnhancedEdgeNormalization => {
                let mut volumes = workloads.fluentd_volumes(names::COLLECTOR_CONFIG, true)?;
                volumes.push(config_map_volume(FLUENTBIT_VOLUME, names::FLUENTBIT)?);
                let template = workloads.pod(
                    values::COMPONENT_COLLECTOR,
                    vec![workloads.fluentd_container(false), workloads.fluentbit_container()],
                    volumes,
                );
                let ds = build_daemonset(
                    names::COLLECTOR,
                    plan.namespace,
                    values::COMPONENT_COLLECTOR,
                    template,
                    plan.owner.clone(),
                )?;
                writes += usize::from(upsert(stores.daemon_sets.as_ref(), &ds, retry).await?.wrote());
            }
            Topology::CentralNormalization => {
                let template = workloads.pod(
                    values::COMPONENT_NORMALIZER,
                    vec![workloads.fluentd_container(false)],
                    workloads.fluentd_volumes(names::NORMALIZER, false)?,
                );
                let deployment = build_deployment(
                    names::NORMALIZER,
                    plan.namespace,
                    values::COMPONENT_NORMALIZER,
                    NORMALIZER_REPLICAS,
                    template,
                    plan.owner.clone(),
                )?;
                writes += usize::from(
                    upsert(stores.deployments.as_ref(), &deployment, retry)
                        .await?
                        .wrote(),
                );

                let template = workloads.pod(
                    values::COMPONENT_COLLECTOR,
                    vec![workloads.fluentbit_container()],
                    vec![
                        config_map_volume(FLUENTBIT_VOLUME, names::FLUENTBIT)?,
                        host_path_volume(VARLOG_VOLUME, paths::CONTAINER_LOGS),
                        host_path_volume(BUFFER_VOLUME, paths::BUFFER_DIR),
                    ],
                );
                let ds = build_daemonset(
                    names::FLUENTBIT,
                    plan.namespace,
                    values::COMPONENT_COLLECTOR,
                    template,
                    plan.owner.clone(),
                )?;
                writes += usize::from(upsert(stores.daemon_sets.as_ref(), &ds, retry).await?.wrote());
            }
        }

        info!(topology = %self, writes, "Topology reconciled");
        Ok(Deployed {
            daemon_set: self.collector_daemonset(),
            config_hash: rendered.config_hash,
            writes,
        })
    }

    /// Remove every object this topology created. Missing objects are fine.
    pub async fn undeploy(&self, stores: &ClusterStores) -> std::result::Result<(), StoreError> {
        info!(topology = %self, "Undeploying topology");
        match self {
            Topology::EdgeNormalization | Topology::EnhancedEdgeNormalization => {
                delete_if_present(stores.daemon_sets.as_ref(), names::COLLECTOR).await?;
                delete_if_present(stores.services.as_ref(), names::COLLECTOR).await?;
                delete_if_present(stores.config_maps.as_ref(), names::COLLECTOR_CONFIG).await?;
                if *self == Topology::EnhancedEdgeNormalization {
                    delete_if_present(stores.config_maps.as_ref(), names::FLUENTBIT).await?;
                }
            }
            Topology::CentralNormalization => {
                delete_if_present(stores.daemon_sets.as_ref(), names::FLUENTBIT).await?;
                delete_if_present(stores.config_maps.as_ref(), names::FLUENTBIT).await?;
                delete_if_present(stores.deployments.as_ref(), names::NORMALIZER).await?;
                delete_if_present(stores.services.as_ref(), names::NORMALIZER).await?;
                delete_if_present(stores.config_maps.as_ref(), names::NORMALIZER).await?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container images of the collector workloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Images {
    pub fluentd: String,
    pub fluentbit: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            fluentd: crate::constants::defaults::COLLECTOR_IMAGE.to_string(),
            fluentbit: crate::constants::defaults::FLUENTBIT_IMAGE.to_string(),
        }
    }
}

/// Everything a topology needs to lay out its workloads.
#[derive(Clone, Debug)]
pub struct CollectorPlan<'a> {
    pub namespace: &'a str,
    /// Sanitized forwarder spec.
    pub forwarder: &'a ClusterLogForwarderSpec,
    pub kind: CollectorKind,
    pub fluentd: &'a FluentdSpec,
    pub images: &'a Images,
    pub owner: Option<OwnerReference>,
}

#[derive(Clone, Debug)]
pub struct Rendered {
    pub config_maps: Vec<ConfigMap>,
    /// Hash over every rendered configuration file.
    pub config_hash: String,
}

/// Result of [`Topology::reconcile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployed {
    pub daemon_set: &'static str,
    pub config_hash: String,
    /// Objects created or updated.
    pub writes: usize,
}

struct Workloads<'p, 'a> {
    plan: &'p CollectorPlan<'a>,
    config_hash: &'p str,
}

impl Workloads<'_, '_> {
    /// Secrets referenced by outputs, mounted where the generated config reads them.
    fn output_secrets(&self) -> BTreeSet<&str> {
        self.plan
            .forwarder
            .outputs
            .iter()
            .filter_map(|o| o.secret.as_ref())
            .map(|s| s.name.as_str())
            .collect()
    }

    fn fluentd_container(&self, tails_node: bool) -> Container {
        let mut mounts = vec![
            Mount::read_only(CONFIG_VOLUME, paths::FLUENTD_CONFIG_DIR),
            Mount::read_only(CERTS_VOLUME, paths::METRICS_CERTS),
            Mount::read_write(BUFFER_VOLUME, paths::BUFFER_DIR),
        ];
        if tails_node {
            mounts.push(Mount::read_only(VARLOG_VOLUME, paths::CONTAINER_LOGS));
        }
        for secret in self.output_secrets() {
            mounts.push(Mount::read_only(
                &secret_volume_name(secret),
                &format!("{}/{secret}", paths::SECRETS_DIR),
            ));
        }

        let mut ports = vec![("metrics".to_string(), ports::COLLECTOR_METRICS)];
        if !tails_node {
            ports.push(("forward".to_string(), ports::NORMALIZER_FORWARD));
        }

        build_container(ContainerParams {
            name: names::COLLECTOR.into(),
            image: self.plan.images.fluentd.clone(),
            command: Some(vec![
                "/bin/bash".into(),
                format!("{}/{}", paths::FLUENTD_CONFIG_DIR, keys::RUN_SCRIPT),
            ]),
            env: vec![("LOG_LEVEL".into(), "warn".into())],
            field_env: vec![
                ("NODE_NAME".into(), "spec.nodeName".into()),
                ("POD_IP".into(), "status.podIP".into()),
            ],
            ports,
            mounts,
            resources: self.plan.fluentd.resources.as_ref().map(|r| r.to_k8s()),
            privileged: tails_node,
        })
    }

    fn fluentd_volumes(&self, config_map: &str, on_node: bool) -> Result<Vec<Volume>> {
        let mut volumes = vec![
            config_map_volume(CONFIG_VOLUME, config_map)?,
            secret_volume(CERTS_VOLUME, names::COLLECTOR_SECRET),
        ];
        if on_node {
            volumes.push(host_path_volume(VARLOG_VOLUME, paths::CONTAINER_LOGS));
            volumes.push(host_path_volume(BUFFER_VOLUME, paths::BUFFER_DIR));
        } else {
            volumes.push(empty_dir_volume(BUFFER_VOLUME));
        }
        for secret in self.output_secrets() {
            volumes.push(secret_volume(&secret_volume_name(secret), secret));
        }
        Ok(volumes)
    }

    fn fluentbit_container(&self) -> Container {
        build_container(ContainerParams {
            name: names::FLUENTBIT.into(),
            image: self.plan.images.fluentbit.clone(),
            command: Some(vec![
                "/fluent-bit/bin/fluent-bit".into(),
                "-c".into(),
                format!("{}/{}", paths::FLUENTBIT_CONFIG_DIR, keys::FLUENTBIT_CONF),
            ]),
            env: vec![("LOG_LEVEL".into(), "info".into())],
            field_env: vec![("NODE_NAME".into(), "spec.nodeName".into())],
            ports: Vec::new(),
            mounts: vec![
                Mount::read_only(FLUENTBIT_VOLUME, paths::FLUENTBIT_CONFIG_DIR),
                Mount::read_only(VARLOG_VOLUME, paths::CONTAINER_LOGS),
                Mount::read_write(BUFFER_VOLUME, paths::BUFFER_DIR),
            ],
            resources: None,
            privileged: true,
        })
    }

    /// Pod template annotated with the config hash so pods roll on config changes.
    fn pod(&self, component: &str, containers: Vec<Container>, volumes: Vec<Volume>) -> PodTemplateSpec {
        let tolerations = self
            .plan
            .fluentd
            .tolerations
            .iter()
            .map(|t| t.to_k8s())
            .collect();
        let node_selector = self
            .plan
            .fluentd
            .node_selector
            .clone()
            .or_else(|| Some(BTreeMap::from([("kubernetes.io/os".into(), "linux".into())])));

        let mut template = build_pod_template(
            component_labels(component),
            containers,
            volumes,
            node_selector,
            tolerations,
        );
        template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(annotations::CONFIG_HASH.to_string(), self.config_hash.to_string());
        template
    }
}

/// Volume name for an output secret. Secret names may contain dots, volume names may not.
fn secret_volume_name(secret: &str) -> String {
    let mut name = format!("secret-{}", secret.replace('.', "-"));
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}
