//! Manifests and configuration of the benchmark pod.
//!
//! A single pod runs the collector under test, the log stressors and a
//! fluentd receiver. Stressors append CRI-formatted lines to a shared
//! `emptyDir` mounted where the collector tails container logs; the collector
//! forwards them to the receiver over localhost, and the receiver stamps each
//! record with its arrival time before printing it to stdout.

use std::collections::BTreeMap;
use std::fs;

use k8s_openapi::api::core::v1::{Pod, PodSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use logging_operator::constants::{keys, paths, ports};
use logging_operator::crds::forwarder::{ApplicationSource, InputSpec, OutputSpec, PipelineSpec};
use logging_operator::crds::ClusterLogForwarderSpec;
use logging_operator::forwarder::{self, NormalizeContext, SecretIndex};
use logging_operator::generator::{self, fluentd, CollectorKind};
use logging_operator::resources::configmap_builder::build_config_configmap;
use logging_operator::resources::pod_builder::{
    build_container, config_map_volume, empty_dir_volume, ContainerParams, Mount,
};
use tracing::debug;
use uuid::Uuid;

use crate::config::{CollectorConfigSource, Options, PayloadSource};
use crate::error::{BenchmarkError, Result};

pub const POD_NAME: &str = "functional";
pub const COLLECTOR_CONTAINER: &str = "collector";
pub const RECEIVER_CONTAINER: &str = "receiver";
pub const COLLECTOR_CONFIGMAP: &str = "collector";
pub const RECEIVER_CONFIGMAP: &str = "receiver";

/// Image running the stressor loop; needs bash and GNU date.
pub const STRESSOR_IMAGE: &str = "registry.access.redhat.com/ubi9/ubi-minimal:latest";

const CONTAINER_LOGS: &str = "/var/log/containers";
const RECEIVER_CONFIG_DIR: &str = "/etc/receiver";
const COMPONENT: &str = "functional-benchmark";
const RECEIVER_OUTPUT: &str = "receiver";

/// Fluentd configuration of the receiver.
pub const RECEIVER_CONF: &str = r#"<system>
  log_level warn
</system>

<source>
  @type forward
  bind 127.0.0.1
  port 24224
</source>

<filter **>
  @type record_transformer
  enable_ruby true
  renew_record true
  <record>
    epoc_in ${time.to_f}
    epoc_out ${Time.now.utc.to_f}
    message ${record["message"]}
  </record>
</filter>

<match **>
  @type stdout
  <format>
    @type json
  </format>
</match>
"#;

/// Minimal collector configuration: tail, parse CRI, forward.
pub const BASELINE_CONF: &str = r#"<system>
  log_level warn
</system>

<source>
  @type tail
  path /var/log/containers/*.log
  pos_file /var/lib/fluentd/pos/baseline.log.pos
  tag kubernetes.*
  read_from_head true
  <parse>
    @type regexp
    expression /^(?<time>[^\s]+) (?<stream>stdout|stderr) (?<logtag>[FP]) (?<message>.*)$/
    time_format %Y-%m-%dT%H:%M:%S.%N%z
  </parse>
</source>

<match **>
  @type forward
  heartbeat_type none
  <server>
    host 127.0.0.1
    port 24224
  </server>
  <buffer>
    flush_interval 1s
  </buffer>
</match>
"#;

/// Appends `functional.0.<STREAM_ID> - <seq> - <payload>` lines in CRI format.
const STRESSOR_SCRIPT: &str = r#"f="/var/log/containers/${POD_NAME}_${NAMESPACE}_${LOADER}-${STREAM_ID}.log"
seq=0
while true; do
  seq=$((seq+1))
  printf '%s stdout F functional.0.%s - %010d - %s\n' "$(date -u +%Y-%m-%dT%H:%M:%S.%NZ)" "$STREAM_ID" "$seq" "$PAYLOAD" >> "$f"
  sleep "$INTERVAL"
done
"#;

const APPLICATION_TEXT: &str = "GET /api/v1/orders?page=2 200 12ms user=alice \
    POST /api/v1/orders 201 48ms user=bob \
    DELETE /api/v1/orders/7 404 3ms user=carol \
    connection pool exhausted retrying in 250ms ";

/// Read or generate the collector configuration text.
pub fn collector_config(options: &Options, namespace: &str) -> Result<String> {
    match options.collector_config_source() {
        CollectorConfigSource::Generated => generated_config(namespace),
        CollectorConfigSource::Baseline => Ok(BASELINE_CONF.to_string()),
        CollectorConfigSource::Stdin => Ok(std::io::read_to_string(std::io::stdin())?),
        CollectorConfigSource::File(path) => Ok(fs::read_to_string(path)?),
    }
}

/// Forwarder spec sending the benchmark namespace's application logs to the
/// receiver.
pub fn benchmark_forwarder(namespace: &str) -> ClusterLogForwarderSpec {
    ClusterLogForwarderSpec {
        inputs: vec![InputSpec {
            name: "benchmark".into(),
            application: Some(ApplicationSource {
                namespaces: vec![namespace.to_string()],
            }),
            ..Default::default()
        }],
        outputs: vec![OutputSpec {
            name: RECEIVER_OUTPUT.into(),
            type_: "fluentdForward".into(),
            url: format!("tcp://127.0.0.1:{}", ports::FORWARD),
            secret: None,
            syslog: None,
        }],
        pipelines: vec![PipelineSpec {
            name: "benchmark".into(),
            input_refs: vec!["benchmark".into()],
            output_refs: vec![RECEIVER_OUTPUT.into()],
        }],
        disable_default_forwarding: true,
    }
}

fn generated_config(namespace: &str) -> Result<String> {
    let secrets = SecretIndex::default();
    let normalized = forwarder::normalize(
        &benchmark_forwarder(namespace),
        &NormalizeContext::new(namespace, false, &secrets),
    );
    if normalized.spec.pipelines.is_empty() {
        return Err(BenchmarkError::Config(format!(
            "benchmark forwarder was rejected: {:?}",
            normalized.status.conditions
        )));
    }
    let conf = generator::generate(&normalized.spec, CollectorKind::Fluentd, namespace)?;
    debug!(bytes = conf.len(), "Generated collector configuration");
    Ok(conf)
}

/// Files of the collector ConfigMap for configuration `conf`.
pub fn collector_files(conf: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (keys::FLUENT_CONF.to_string(), conf.to_string()),
        (keys::RUN_SCRIPT.to_string(), fluentd::RUN_SCRIPT.to_string()),
    ])
}

pub fn collector_configmap(namespace: &str, conf: &str) -> k8s_openapi::api::core::v1::ConfigMap {
    build_config_configmap(COLLECTOR_CONFIGMAP, namespace, COMPONENT, collector_files(conf), None)
}

pub fn receiver_configmap(namespace: &str) -> k8s_openapi::api::core::v1::ConfigMap {
    let files = BTreeMap::from([(keys::FLUENT_CONF.to_string(), RECEIVER_CONF.to_string())]);
    build_config_configmap(RECEIVER_CONFIGMAP, namespace, COMPONENT, files, None)
}

/// Stressor payload of `size` bytes.
pub fn payload(source: PayloadSource, size: usize) -> String {
    match source {
        PayloadSource::Synthetic => std::iter::repeat_with(fastrand::alphanumeric)
            .take(size)
            .collect(),
        PayloadSource::Application => APPLICATION_TEXT.chars().cycle().take(size).collect(),
        PayloadSource::Simple => "a".repeat(size),
    }
}

/// Fresh stream identifier: upper-case hex, as the line format requires.
pub fn stream_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}

/// Seconds between two lines of one stressor.
pub fn interval(lines_per_sec: u32) -> String {
    format!("{:.6}", 1.0 / f64::from(lines_per_sec.max(1)))
}

/// The benchmark pod.
pub fn benchmark_pod(options: &Options, namespace: &str) -> Result<Pod> {
    let pod_env = || {
        vec![
            ("NAMESPACE".to_string(), "metadata.namespace".to_string()),
            ("POD_NAME".to_string(), "metadata.name".to_string()),
        ]
    };

    let mut containers = vec![build_container(ContainerParams {
        name: COLLECTOR_CONTAINER.into(),
        image: options.image.clone(),
        command: Some(vec![
            "/bin/bash".into(),
            format!("{}/{}", paths::FLUENTD_CONFIG_DIR, keys::RUN_SCRIPT),
        ]),
        env: vec![("LOG_LEVEL".into(), "warn".into())],
        field_env: vec![("NODE_NAME".into(), "spec.nodeName".into())],
        mounts: vec![
            Mount::read_only("collector-config", paths::FLUENTD_CONFIG_DIR),
            Mount::read_only("containers", CONTAINER_LOGS),
            Mount::read_write("buffer", paths::BUFFER_DIR),
        ],
        ..Default::default()
    })];

    let payload = payload(options.payload_source, options.size);
    for i in 0..options.tot_stressors {
        let name = format!("loader-{i}");
        containers.push(build_container(ContainerParams {
            name: name.clone(),
            image: STRESSOR_IMAGE.into(),
            command: Some(vec!["/bin/bash".into(), "-c".into(), STRESSOR_SCRIPT.into()]),
            env: vec![
                ("LOADER".into(), name),
                ("STREAM_ID".into(), stream_id()),
                ("PAYLOAD".into(), payload.clone()),
                ("INTERVAL".into(), interval(options.lines_per_sec)),
            ],
            field_env: pod_env(),
            mounts: vec![Mount::read_write("containers", CONTAINER_LOGS)],
            ..Default::default()
        }));
    }

    containers.push(build_container(ContainerParams {
        name: RECEIVER_CONTAINER.into(),
        image: options.image.clone(),
        command: Some(vec![
            "fluentd".into(),
            "--no-supervisor".into(),
            "-c".into(),
            format!("{RECEIVER_CONFIG_DIR}/{}", keys::FLUENT_CONF),
        ]),
        mounts: vec![Mount::read_only("receiver-config", RECEIVER_CONFIG_DIR)],
        ..Default::default()
    }));

    let volumes: Vec<Volume> = vec![
        config_map_volume("collector-config", COLLECTOR_CONFIGMAP)
            .map_err(|e| BenchmarkError::deploy("collector config volume", e))?,
        config_map_volume("receiver-config", RECEIVER_CONFIGMAP)
            .map_err(|e| BenchmarkError::deploy("receiver config volume", e))?,
        empty_dir_volume("containers"),
        empty_dir_volume("buffer"),
    ];

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(POD_NAME.into()),
            namespace: Some(namespace.into()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/component".to_string(),
                COMPONENT.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            volumes: Some(volumes),
            restart_policy: Some("Never".into()),
            termination_grace_period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    })
}
