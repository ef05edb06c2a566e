//! Full reconciliation ticks against in-memory stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::ByteString;
use kube::ResourceExt;

use logging_operator::certs::{self, secret_definitions, Certificate, CertificateAuthority, KeyPolicy};
use logging_operator::crds::cluster_logging::{
    CollectionSpec, CollectorType, LogCollectionSpec, LogStoreSpec, LogStoreType, ManagementState,
};
use logging_operator::crds::common::{condition_types, SecretReference};
use logging_operator::crds::{
    ClusterLogForwarder, ClusterLogForwarderSpec, ClusterLogging, ClusterLoggingSpec, OutputSpec,
    PipelineSpec,
};
use logging_operator::reconciler::{ClusterStores, Reconciler, ReconcilerConfig, TickOutcome};
use logging_operator::store::memory::WriteCounts;
use logging_operator::store::{InMemoryStore, RetryConfig};
use logging_operator::topology::Topology;

const NS: &str = "openshift-logging";

struct Harness {
    clusters: Arc<InMemoryStore<ClusterLogging>>,
    forwarders: Arc<InMemoryStore<ClusterLogForwarder>>,
    secrets: Arc<InMemoryStore<Secret>>,
    config_maps: Arc<InMemoryStore<ConfigMap>>,
    services: Arc<InMemoryStore<Service>>,
    daemon_sets: Arc<InMemoryStore<DaemonSet>>,
    deployments: Arc<InMemoryStore<Deployment>>,
    reconciler: Reconciler,
}

impl Harness {
    fn new() -> Self {
        let clusters = Arc::new(InMemoryStore::<ClusterLogging>::new());
        let forwarders = Arc::new(InMemoryStore::<ClusterLogForwarder>::new());
        let secrets = Arc::new(InMemoryStore::<Secret>::new());
        let config_maps = Arc::new(InMemoryStore::<ConfigMap>::new());
        let services = Arc::new(InMemoryStore::<Service>::new());
        let daemon_sets = Arc::new(InMemoryStore::<DaemonSet>::new());
        let deployments = Arc::new(InMemoryStore::<Deployment>::new());
        let stores = ClusterStores {
            cluster_loggings: clusters.clone(),
            forwarders: forwarders.clone(),
            secrets: secrets.clone(),
            config_maps: config_maps.clone(),
            services: services.clone(),
            daemon_sets: daemon_sets.clone(),
            deployments: deployments.clone(),
        };
        let config = ReconcilerConfig {
            key_policy: KeyPolicy::fast(),
            retry: RetryConfig::immediate(5),
            ..ReconcilerConfig::new(NS)
        };
        Self {
            clusters,
            forwarders,
            secrets,
            config_maps,
            services,
            daemon_sets,
            deployments,
            reconciler: Reconciler::new(stores, config),
        }
    }

    fn seed_cluster(&self, spec: ClusterLoggingSpec, topology: Option<Topology>) {
        let mut cluster = ClusterLogging::new("instance", spec);
        cluster.metadata.namespace = Some(NS.into());
        cluster.metadata.uid = Some("0b7f3c2e-uid".into());
        cluster.metadata.generation = Some(1);
        if let Some(topology) = topology {
            cluster.annotations_mut().insert(
                "clusterlogging.openshift.io/logforwardingtopology".into(),
                topology.as_str().into(),
            );
        }
        self.clusters.insert(cluster);
    }

    fn cluster(&self) -> ClusterLogging {
        self.clusters.snapshot("instance").expect("cluster is seeded")
    }

    fn total_writes(&self) -> WriteCounts {
        let all = [
            self.clusters.write_counts(),
            self.forwarders.write_counts(),
            self.secrets.write_counts(),
            self.config_maps.write_counts(),
            self.services.write_counts(),
            self.daemon_sets.write_counts(),
            self.deployments.write_counts(),
        ];
        all.iter().fold(WriteCounts::default(), |acc, c| WriteCounts {
            creates: acc.creates + c.creates,
            updates: acc.updates + c.updates,
            status_updates: acc.status_updates + c.status_updates,
            deletes: acc.deletes + c.deletes,
        })
    }
}

fn with_log_store() -> ClusterLoggingSpec {
    ClusterLoggingSpec {
        log_store: Some(LogStoreSpec {
            type_: LogStoreType::Elasticsearch,
            elasticsearch: None,
        }),
        ..Default::default()
    }
}

fn secret(name: &str, keys: &[&str]) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.into());
    secret.data = Some(
        keys.iter()
            .map(|k| (k.to_string(), ByteString(b"value".to_vec())))
            .collect::<BTreeMap<_, _>>(),
    );
    secret
}

fn data_str(secret: &Secret, key: &str) -> String {
    let data = secret.data.as_ref().expect("secret has data");
    String::from_utf8(data[key].0.clone()).expect("utf-8 data")
}

#[tokio::test]
async fn test_first_tick_deploys_edge_and_issues_certificates() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);

    let outcome = h.reconciler.reconcile(&h.cluster()).await.unwrap();
    let TickOutcome::Reconciled(report) = outcome else {
        panic!("managed instance was skipped");
    };
    assert_eq!(report.topology, Topology::EdgeNormalization);
    assert_eq!(report.deployed.daemon_set, "fluentd");
    assert!(report.certificates_issued >= secret_definitions().len());
    assert!(!report.degraded);

    let mut expected = vec!["master-certs".to_string()];
    expected.extend(secret_definitions().iter().map(|d| d.name.to_string()));
    expected.sort();
    assert_eq!(h.secrets.names(), expected);
    assert_eq!(h.daemon_sets.names(), vec!["fluentd"]);
    assert_eq!(h.services.names(), vec!["fluentd"]);
    assert!(h.deployments.names().is_empty());

    let conf = h.config_maps.snapshot("fluentd").unwrap().data.unwrap();
    assert!(conf["fluent.conf"].contains("elasticsearch.openshift-logging.svc"));

    let status = h.cluster().status.unwrap();
    assert_eq!(status.topology.as_deref(), Some("edgeNormalization"));
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.conditions.iter().any(|c| c.type_ == condition_types::READY && c.is_true()));
    assert_eq!(
        status.collector.unwrap().config_hash.as_deref(),
        Some(report.deployed.config_hash.as_str())
    );
}

/// INVARIANT: every issued certificate verifies against the persisted CA and
/// is still valid.
#[tokio::test]
async fn test_issued_certificates_verify_against_ca() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.reconciler.reconcile(&h.cluster()).await.unwrap();

    let now = certs::now();
    let ca_secret = h.secrets.snapshot("master-certs").unwrap();
    let ca = CertificateAuthority::from_secret_data(ca_secret.data.as_ref().unwrap()).unwrap();
    ca.validate(now).unwrap();

    for def in secret_definitions() {
        let secret = h.secrets.snapshot(def.name).unwrap();
        for key in def.ca_keys {
            assert_eq!(data_str(&secret, key), ca.cert_pem(), "{}: stale CA copy", def.name);
        }
        for cert_def in def.certs {
            let cert = Certificate::from_pem(
                &data_str(&secret, cert_def.cert_key),
                &data_str(&secret, cert_def.key_key),
            )
            .unwrap();
            ca.verify(&cert, cert_def.common_name, now).unwrap();
            assert!(cert.not_after().unwrap() > now);
        }
        if let Some(session_key) = def.session_key {
            assert_eq!(data_str(&secret, session_key).len(), 32);
        }
    }
}

/// INVARIANT: a second tick with unchanged desired state writes nothing.
#[tokio::test]
async fn test_steady_state_tick_writes_nothing() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.forwarders.insert(ClusterLogForwarder::new(
        "instance",
        ClusterLogForwarderSpec::default(),
    ));

    h.reconciler.reconcile(&h.cluster()).await.unwrap();
    let after_first = h.total_writes();
    assert!(after_first.creates > 0);

    h.reconciler.reconcile(&h.cluster()).await.unwrap();
    assert_eq!(h.total_writes(), after_first);
}

#[tokio::test]
async fn test_forwarder_status_and_outputs_flow_into_config() {
    let h = Harness::new();
    h.seed_cluster(ClusterLoggingSpec::default(), None);
    h.secrets.insert(secret("remote-fwd", &["shared_key"]));
    let mut forwarder = ClusterLogForwarder::new(
        "instance",
        ClusterLogForwarderSpec {
            outputs: vec![
                OutputSpec {
                    name: "remote".into(),
                    type_: "forward".into(),
                    url: "collector.example.com:24224".into(),
                    secret: Some(SecretReference {
                        name: "remote-fwd".into(),
                    }),
                    syslog: None,
                },
                OutputSpec {
                    name: "broken".into(),
                    type_: "foo".into(),
                    url: "x".into(),
                    ..Default::default()
                },
            ],
            pipelines: vec![PipelineSpec {
                name: "apps".into(),
                input_refs: vec!["application".into()],
                output_refs: vec!["remote".into(), "broken".into()],
            }],
            ..Default::default()
        },
    );
    forwarder.metadata.generation = Some(7);
    h.forwarders.insert(forwarder);

    let TickOutcome::Reconciled(report) = h.reconciler.reconcile(&h.cluster()).await.unwrap() else {
        panic!("managed instance was skipped");
    };
    assert!(report.degraded);

    let status = h.forwarders.snapshot("instance").unwrap().status.unwrap();
    assert_eq!(status.observed_generation, Some(7));
    assert!(status.is_ready());
    assert!(status.outputs["remote"].is_ready());
    assert!(!status.outputs["broken"].is_ready());

    let conf = h.config_maps.snapshot("fluentd").unwrap().data.unwrap();
    assert!(conf["fluent.conf"].contains("collector.example.com"));
    assert!(!conf["fluent.conf"].contains("elasticsearch.openshift-logging.svc"));

    let cluster_status = h.cluster().status.unwrap();
    let degraded = cluster_status
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::DEGRADED)
        .unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason.as_deref(), Some("ForwarderDegraded"));
}

#[tokio::test]
async fn test_pending_collector_pods_mark_unschedulable() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.reconciler.reconcile(&h.cluster()).await.unwrap();

    let unschedulable = |h: &Harness| {
        h.cluster()
            .status
            .unwrap()
            .conditions
            .into_iter()
            .find(|c| c.type_ == condition_types::UNSCHEDULABLE)
            .unwrap()
    };
    assert!(!unschedulable(&h).is_true());

    // Two of three nodes have no room for the collector.
    let mut daemon_set = h.daemon_sets.snapshot("fluentd").unwrap();
    daemon_set.status = Some(DaemonSetStatus {
        desired_number_scheduled: 3,
        current_number_scheduled: 1,
        ..Default::default()
    });
    h.daemon_sets.insert(daemon_set);

    let TickOutcome::Reconciled(report) = h.reconciler.reconcile(&h.cluster()).await.unwrap() else {
        panic!("managed instance was skipped");
    };
    assert_eq!(report.unscheduled, Some((2, 3)));
    let condition = unschedulable(&h);
    assert!(condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some("CollectorPodsUnschedulable"));
    let status = h.cluster().status.unwrap();
    assert!(status.conditions.iter().any(|c| c.type_ == condition_types::READY && c.is_true()));
}

#[tokio::test]
async fn test_topology_switch_undeploys_previous_variant() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.reconciler.reconcile(&h.cluster()).await.unwrap();
    assert_eq!(h.daemon_sets.names(), vec!["fluentd"]);

    let mut cluster = h.cluster();
    cluster.annotations_mut().insert(
        "clusterlogging.openshift.io/logforwardingtopology".into(),
        "centralNormalization".into(),
    );
    let TickOutcome::Reconciled(report) = h.reconciler.reconcile(&cluster).await.unwrap() else {
        panic!("managed instance was skipped");
    };
    assert_eq!(report.topology, Topology::CentralNormalization);
    assert_eq!(report.deployed.daemon_set, "fluentbit");

    assert_eq!(h.daemon_sets.names(), vec!["fluentbit"]);
    assert_eq!(h.deployments.names(), vec!["normalizer"]);
    assert_eq!(h.services.names(), vec!["normalizer"]);
    assert_eq!(h.config_maps.names(), vec!["fluentbit", "normalizer"]);

    let replicas = h
        .deployments
        .snapshot("normalizer")
        .and_then(|d| d.spec)
        .and_then(|s| s.replicas);
    assert_eq!(replicas, Some(4));
    assert_eq!(
        h.cluster().status.unwrap().topology.as_deref(),
        Some("centralNormalization")
    );

    h.reconciler.cleanup(&h.cluster()).await.unwrap();
    assert!(h.daemon_sets.names().is_empty());
    assert!(h.deployments.names().is_empty());
    assert!(h.config_maps.names().is_empty());
}

#[tokio::test]
async fn test_unmanaged_instance_is_skipped() {
    let h = Harness::new();
    h.seed_cluster(
        ClusterLoggingSpec {
            management_state: ManagementState::Unmanaged,
            ..with_log_store()
        },
        None,
    );

    let outcome = h.reconciler.reconcile(&h.cluster()).await.unwrap();
    assert_eq!(outcome, TickOutcome::Skipped);
    assert_eq!(h.total_writes(), WriteCounts::default());
    assert!(h.secrets.names().is_empty());
}

#[tokio::test]
async fn test_unsupported_collector_is_reported_on_status() {
    let h = Harness::new();
    h.seed_cluster(
        ClusterLoggingSpec {
            collection: Some(CollectionSpec {
                logs: LogCollectionSpec {
                    type_: CollectorType::Fluentbit,
                    fluentd: None,
                },
            }),
            ..with_log_store()
        },
        None,
    );

    let err = h.reconciler.reconcile(&h.cluster()).await.unwrap_err();
    assert_eq!(err.reason(), "CollectorConfigError");
    assert!(!err.is_transient());
    assert!(h.daemon_sets.names().is_empty());

    let status = h.cluster().status.unwrap();
    let ready = status
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::READY)
        .unwrap();
    assert!(!ready.is_true());
    assert_eq!(ready.reason.as_deref(), Some("CollectorConfigError"));
    assert!(ready.last_transition_time.is_some());
}

#[tokio::test]
async fn test_status_update_survives_conflicts() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.clusters.inject_conflicts(2);

    h.reconciler.reconcile(&h.cluster()).await.unwrap();
    let status = h.cluster().status.unwrap();
    assert_eq!(status.topology.as_deref(), Some("edgeNormalization"));
}

#[tokio::test]
async fn test_stale_ca_is_replaced_and_certificates_reissued() {
    let h = Harness::new();
    h.seed_cluster(with_log_store(), None);
    h.reconciler.reconcile(&h.cluster()).await.unwrap();

    let fresh = Harness::new();
    fresh.seed_cluster(with_log_store(), None);
    fresh.secrets.insert(secret("master-certs", &["ca.crt", "ca.key", "serial"]));
    let TickOutcome::Reconciled(report) = fresh.reconciler.reconcile(&fresh.cluster()).await.unwrap()
    else {
        panic!("managed instance was skipped");
    };
    assert!(report.certificates_issued >= secret_definitions().len());

    let ca_secret = fresh.secrets.snapshot("master-certs").unwrap();
    let ca = CertificateAuthority::from_secret_data(ca_secret.data.as_ref().unwrap()).unwrap();
    ca.validate(certs::now()).unwrap();
    assert!(fresh.cluster().status.unwrap().conditions[0].is_true());
    assert_eq!(ca_secret.name_any(), "master-certs");
}
