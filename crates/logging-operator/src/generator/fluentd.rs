//! fluentd configuration for the collector daemonset.
//!
//! Logs flow through a fixed chain of labels: every source feeds `@MEASURE`,
//! container logs are joined in `@CONCAT`, and `@INGRESS` enriches records and
//! splits them by log type into `@_APPLICATION`, `@_INFRASTRUCTURE` and
//! `@_AUDIT`. From there each source label copies to the pipelines that consume
//! it, and each pipeline label copies to its outputs.

use std::collections::{BTreeMap, BTreeSet};

use url::Url;

use super::{Directive, GenerateError, Ingest};
use crate::conditions::{OutputType, SourceType};
use crate::constants::{keys, names, paths};
use crate::crds::defaults;
use crate::crds::{ClusterLogForwarderSpec, InputSpec, OutputSpec};
use crate::forwarder::url as endpoint;

/// Entrypoint of the fluentd container.
pub const RUN_SCRIPT: &str = include_str!("assets/run.sh");

const HEADER: &str = "\
## CLO GENERATED CONFIGURATION ###
# This file is a copy of the fluentd configuration entrypoint
# which should normally be supplied in a configmap.
";

const MEASURE: &str = "@MEASURE";
const CONCAT: &str = "@CONCAT";
const INGRESS: &str = "@INGRESS";
const APPLICATION_ALL: &str = "@_APPLICATION_ALL";

const INFRA_TAGS: &str =
    "**_default_** **_kube-*_** **_openshift-*_** **_openshift_** journal.** system.var.log**";
const AUDIT_TAGS: &str = "linux-audit.log** k8s-audit.log** openshift-audit.log**";

fn source_label(source: SourceType) -> &'static str {
    match source {
        SourceType::Application => "@_APPLICATION",
        SourceType::Infrastructure => "@_INFRASTRUCTURE",
        SourceType::Audit => "@_AUDIT",
    }
}

/// Render the fluentd configuration for `spec`, reading logs from the node.
pub fn generate(spec: &ClusterLogForwarderSpec, namespace: &str) -> Result<String, GenerateError> {
    generate_with(spec, namespace, Ingest::Tail)
}

/// Render the fluentd configuration for `spec` with the given log ingest.
pub fn generate_with(
    spec: &ClusterLogForwarderSpec,
    namespace: &str,
    ingest: Ingest,
) -> Result<String, GenerateError> {
    let plan = Plan::build(spec)?;

    let mut sections = vec![
        Directive::new("system").param("log_level", "\"#{ENV['LOG_LEVEL'] || 'warn'}\""),
        prometheus_source(),
        Directive::new("source")
            .param("@type", "prometheus_monitor")
            .section(Directive::new("labels").param("hostname", "${hostname}")),
        Directive::new("source")
            .param("@type", "prometheus_output_monitor")
            .section(Directive::new("labels").param("hostname", "${hostname}")),
    ];
    match ingest {
        Ingest::Tail => sections.extend(input_sources(&plan, namespace)),
        Ingest::Forward { port } => sections.push(forward_source(port)),
    }
    sections.push(measure_label());
    sections.push(concat_label());
    sections.push(ingress_label(&plan));
    for (source, routes) in &plan.sources {
        sections.extend(source_labels(*source, routes));
    }
    sections.extend(plan.pipelines.iter().map(pipeline_label));
    sections.extend(plan.outputs.iter().map(output_label));

    let mut text = HEADER.to_string();
    for section in sections {
        text.push('\n');
        text.push_str(&section.to_string());
    }
    Ok(text)
}

/// Allocates label names, unique across pipelines and outputs.
struct Labels {
    taken: BTreeSet<String>,
}

impl Labels {
    fn new() -> Self {
        let reserved = [MEASURE, CONCAT, INGRESS, APPLICATION_ALL]
            .into_iter()
            .chain(SourceType::ALL.into_iter().map(source_label))
            .map(str::to_string)
            .collect();
        Self { taken: reserved }
    }

    fn allocate(&mut self, name: &str) -> String {
        let base = format!("@{}", sanitize(name));
        let mut candidate = base.clone();
        let mut n = 2;
        while !self.taken.insert(candidate.clone()) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        candidate
    }
}

/// `my-es.1` becomes `MY_ES_1`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

struct PlannedOutput<'a> {
    spec: &'a OutputSpec,
    output_type: OutputType,
    url: Url,
    label: String,
}

impl PlannedOutput<'_> {
    /// Plugin id, also used for buffer directories.
    fn id(&self) -> String {
        self.label.trim_start_matches('@').to_ascii_lowercase()
    }

    fn retry_tag(&self) -> String {
        format!("retry_{}", self.id())
    }

    fn secret_path(&self, key: &str) -> Option<String> {
        self.spec
            .secret
            .as_ref()
            .map(|s| format!("{}/{}/{key}", paths::SECRETS_DIR, s.name))
    }

    fn buffer_path(&self, retry: bool) -> String {
        match retry {
            true => format!("{}/{}", paths::BUFFER_DIR, self.retry_tag()),
            false => format!("{}/{}", paths::BUFFER_DIR, self.id()),
        }
    }

    fn host_port(&self) -> (String, u16) {
        endpoint::host_port(&self.url, self.output_type)
    }
}

struct PlannedPipeline {
    label: String,
    targets: Vec<String>,
}

/// Pipelines fed by one source type.
#[derive(Default)]
struct SourceRoutes {
    /// Pipelines taking every log of the type.
    all: BTreeSet<String>,
    /// Pipelines taking only the listed namespaces.
    selected: BTreeMap<String, BTreeSet<String>>,
}

struct Plan<'a> {
    outputs: Vec<PlannedOutput<'a>>,
    pipelines: Vec<PlannedPipeline>,
    sources: BTreeMap<SourceType, SourceRoutes>,
}

impl<'a> Plan<'a> {
    fn build(spec: &'a ClusterLogForwarderSpec) -> Result<Self, GenerateError> {
        let mut labels = Labels::new();

        let mut outputs = Vec::with_capacity(spec.outputs.len());
        let mut output_labels = BTreeMap::new();
        for output in &spec.outputs {
            let output_type =
                OutputType::parse(&output.type_).ok_or_else(|| GenerateError::UnsupportedOutputType {
                    output: output.name.clone(),
                    type_: output.type_.clone(),
                })?;
            let promoted = endpoint::promote(&output.url, output_type, output.secret.is_some());
            let url = endpoint::parse_endpoint(&promoted).map_err(|message| {
                GenerateError::InvalidEndpoint {
                    output: output.name.clone(),
                    message,
                }
            })?;
            let label = labels.allocate(&output.name);
            output_labels.insert(output.name.as_str(), label.clone());
            outputs.push(PlannedOutput {
                spec: output,
                output_type,
                url,
                label,
            });
        }

        let declared: BTreeMap<&str, &InputSpec> =
            spec.inputs.iter().map(|i| (i.name.as_str(), i)).collect();

        let mut pipelines = Vec::with_capacity(spec.pipelines.len());
        let mut sources: BTreeMap<SourceType, SourceRoutes> = BTreeMap::new();
        for pipeline in &spec.pipelines {
            let label = labels.allocate(&pipeline.name);
            let unknown = |what: &'static str, name: &str| GenerateError::UnknownReference {
                pipeline: pipeline.name.clone(),
                what,
                name: name.to_string(),
            };

            let targets = pipeline
                .output_refs
                .iter()
                .map(|name| {
                    output_labels
                        .get(name.as_str())
                        .cloned()
                        .ok_or_else(|| unknown("output", name))
                })
                .collect::<Result<Vec<_>, _>>()?;

            for input in &pipeline.input_refs {
                let selections = resolve_input(input, &declared).ok_or_else(|| unknown("input", input))?;
                for (source, namespaces) in selections {
                    let routes = sources.entry(source).or_default();
                    match namespaces {
                        Some(namespaces) => routes
                            .selected
                            .entry(label.clone())
                            .or_default()
                            .extend(namespaces.iter().cloned()),
                        None => {
                            routes.all.insert(label.clone());
                        }
                    }
                }
            }
            pipelines.push(PlannedPipeline { label, targets });
        }

        for routes in sources.values_mut() {
            let all = &routes.all;
            routes.selected.retain(|label, _| !all.contains(label));
        }

        Ok(Self {
            outputs,
            pipelines,
            sources,
        })
    }

    fn collects(&self, source: SourceType) -> bool {
        self.sources.contains_key(&source)
    }
}

/// Source types an input reference selects, with the namespaces it is
/// restricted to when it is a namespaced application input.
fn resolve_input<'a>(
    name: &str,
    declared: &BTreeMap<&str, &'a InputSpec>,
) -> Option<Vec<(SourceType, Option<&'a Vec<String>>)>> {
    if let Some(source) = SourceType::parse(name) {
        return Some(vec![(source, None)]);
    }
    let input: &'a InputSpec = declared.get(name).copied()?;
    let selections = input
        .source_types()
        .into_iter()
        .map(|source| match (&input.application, source) {
            (Some(app), SourceType::Application) if !app.namespaces.is_empty() => {
                (source, Some(&app.namespaces))
            }
            _ => (source, None),
        })
        .collect();
    Some(selections)
}

fn prometheus_source() -> Directive {
    Directive::new("source")
        .param("@type", "prometheus")
        .param("bind", "\"#{ENV['POD_IP']}\"")
        .section(
            Directive::new("ssl")
                .param("enable", "true")
                .param(
                    "certificate_path",
                    format!("\"#{{ENV['METRICS_CERT'] || '{}/tls.crt'}}\"", paths::METRICS_CERTS),
                )
                .param(
                    "private_key_path",
                    format!("\"#{{ENV['METRICS_KEY'] || '{}/tls.key'}}\"", paths::METRICS_CERTS),
                ),
        )
}

fn input_sources(plan: &Plan<'_>, namespace: &str) -> Vec<Directive> {
    let mut sources = Vec::new();
    if plan.collects(SourceType::Infrastructure) {
        sources.push(journal_source());
    }
    if plan.collects(SourceType::Application) || plan.collects(SourceType::Infrastructure) {
        sources.push(container_source(namespace));
    }
    if plan.collects(SourceType::Audit) {
        sources.extend(audit_sources());
    }
    sources
}

/// Records shipped by a fluent-bit collector over the forward protocol.
fn forward_source(port: i32) -> Directive {
    Directive::new("source")
        .param("@type", "forward")
        .param("@id", "forward-input")
        .param("@label", MEASURE)
        .param("port", port.to_string())
        .param("bind", "0.0.0.0")
}

fn journal_source() -> Directive {
    Directive::new("source")
        .param("@type", "systemd")
        .param("@id", "systemd-input")
        .param("@label", MEASURE)
        .param("path", "'/var/log/journal'")
        .section(
            Directive::new("storage")
                .param("@type", "local")
                .param("persistent", "true")
                .param("path", format!("'{}/pos/journal_pos.json'", paths::BUFFER_DIR)),
        )
        .param("matches", "\"#{ENV['JOURNAL_FILTERS_JSON'] || '[]'}\"")
        .param("tag", "journal")
        .param("read_from_head", "\"#{ENV['JOURNAL_READ_FROM_HEAD'] || 'false'}\"")
}

fn container_source(namespace: &str) -> Directive {
    let excluded = [names::COLLECTOR, names::LOG_STORE, "kibana"]
        .iter()
        .map(|prefix| format!("\"/var/log/containers/{prefix}-*_{namespace}_*.log\""))
        .collect::<Vec<_>>()
        .join(", ");

    Directive::new("source")
        .param("@type", "tail")
        .param("@id", "container-input")
        .param("path", "\"/var/log/containers/*.log\"")
        .param("exclude_path", format!("[{excluded}]"))
        .param("pos_file", format!("\"{}/pos/es-containers.log.pos\"", paths::BUFFER_DIR))
        .param("refresh_interval", "5")
        .param("rotate_wait", "5")
        .param("tag", "kubernetes.*")
        .param("read_from_head", "\"true\"")
        .param("@label", MEASURE)
        .section(
            Directive::new("parse")
                .param("@type", "multi_format")
                .section(
                    Directive::new("pattern")
                        .param("format", "json")
                        .param("time_format", "'%Y-%m-%dT%H:%M:%S.%N%Z'")
                        .param("keep_time_key", "true"),
                )
                .section(
                    Directive::new("pattern")
                        .param("format", "regexp")
                        .param(
                            "expression",
                            r"/^(?<time>[^\s]+) (?<stream>stdout|stderr)( (?<logtag>.))? (?<log>.*)$/",
                        )
                        .param("time_format", "'%Y-%m-%dT%H:%M:%S.%N%:z'")
                        .param("keep_time_key", "true"),
                ),
        )
}

fn audit_sources() -> Vec<Directive> {
    let tail = |id: &str, path: String, pos_file: String, tag: &str, parse: Directive| {
        Directive::new("source")
            .param("@type", "tail")
            .param("@id", id)
            .param("@label", MEASURE)
            .param("path", path)
            .param("pos_file", pos_file)
            .param("tag", tag)
            .section(parse)
    };
    let api_audit_parse = || {
        Directive::new("parse")
            .param("@type", "json")
            .param("time_key", "requestReceivedTimestamp")
            .param("keep_time_key", "true")
            .param("time_format", "%Y-%m-%dT%H:%M:%S.%N%z")
    };
    let pos = |file: &str| format!("{}/pos/{file}", paths::BUFFER_DIR);

    vec![
        tail(
            "audit-input",
            "\"#{ENV['AUDIT_FILE'] || '/var/log/audit/audit.log'}\"".to_string(),
            format!("\"{}\"", pos("audit.log.pos")),
            "linux-audit.log",
            Directive::new("parse").param("@type", "viaq_host_audit"),
        ),
        tail(
            "k8s-audit-input",
            "\"#{ENV['K8S_AUDIT_FILE'] || '/var/log/kube-apiserver/audit.log'}\"".to_string(),
            format!("\"{}\"", pos("kube-apiserver.audit.log.pos")),
            "k8s-audit.log",
            api_audit_parse(),
        ),
        tail(
            "openshift-audit-input",
            "/var/log/oauth-apiserver/audit.log,/var/log/openshift-apiserver/audit.log".to_string(),
            pos("oauth-apiserver.audit.log"),
            "openshift-audit.log",
            api_audit_parse(),
        ),
    ]
}

fn relabel(pattern: &str, label: &str) -> Directive {
    Directive::with_arg("match", pattern)
        .param("@type", "relabel")
        .param("@label", label)
}

/// Relabel matching records to `label`, or discard them when nothing consumes them.
fn relabel_or_discard(pattern: &str, label: &str, wanted: bool) -> Directive {
    if wanted {
        relabel(pattern, label)
    } else {
        Directive::with_arg("match", pattern).param("@type", "null")
    }
}

fn measure_label() -> Directive {
    let counter = |name: &str, desc: &str, key: Option<&str>| {
        let metric = Directive::new("metric")
            .param("name", name)
            .param("type", "counter")
            .param("desc", desc);
        let metric = match key {
            Some(key) => metric.param("key", key),
            None => metric,
        };
        Directive::with_arg("filter", "**").param("@type", "prometheus").section(
            metric.section(
                Directive::new("labels")
                    .param("tag", "${tag}")
                    .param("hostname", "${hostname}"),
            ),
        )
    };

    Directive::with_arg("label", MEASURE)
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "record_transformer")
                .param("enable_ruby", "")
                .section(Directive::new("record").param("msg_size", "${record.to_s.length}")),
        )
        .section(counter(
            "cluster_logging_collector_input_record_total",
            "The total number of incoming records",
            None,
        ))
        .section(counter(
            "cluster_logging_collector_input_record_bytes",
            "The total bytes of incoming records",
            Some("msg_size"),
        ))
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "record_transformer")
                .param("remove_keys", "msg_size"),
        )
        .section(relabel("journal", INGRESS))
        .section(relabel("*audit.log", INGRESS))
        .section(relabel("kubernetes.**", CONCAT))
}

fn concat_label() -> Directive {
    Directive::with_arg("label", CONCAT)
        .section(
            Directive::with_arg("filter", "kubernetes.**")
                .param("@type", "concat")
                .param("key", "log")
                .param("partial_key", "logtag")
                .param("partial_value", "P")
                .param("separator", "''"),
        )
        .section(relabel("kubernetes.**", INGRESS))
}

fn ingress_label(plan: &Plan<'_>) -> Directive {
    let rule = |key: &str, pattern: &str, tag: &str| {
        Directive::new("rule")
            .param("key", key)
            .param("pattern", pattern)
            .param("tag", tag)
    };
    let index = |tag: &str, name: &str| {
        Directive::new("elasticsearch_index_name")
            .param("enabled", "'true'")
            .param("tag", format!("\"{tag}\""))
            .param("name_type", "static")
            .param("static_index_name", name)
    };

    Directive::with_arg("label", INGRESS)
        .section(
            Directive::with_arg("filter", "journal")
                .param("@type", "grep")
                .section(Directive::new("exclude").param("key", "PRIORITY").param("pattern", "^7$")),
        )
        .section(
            Directive::with_arg("match", "journal")
                .param("@type", "rewrite_tag_filter")
                .param("@label", INGRESS)
                .section(rule(
                    "CONTAINER_NAME",
                    "^k8s_[^_]+_[^_]+_default_",
                    "kubernetes.journal.container._default_",
                ))
                .section(rule(
                    "CONTAINER_NAME",
                    "^k8s_[^_]+_[^_]+_kube-(.+)_",
                    "kubernetes.journal.container._kube-$1_",
                ))
                .section(rule(
                    "CONTAINER_NAME",
                    "^k8s_[^_]+_[^_]+_openshift-(.+)_",
                    "kubernetes.journal.container._openshift-$1_",
                ))
                .section(rule(
                    "CONTAINER_NAME",
                    "^k8s_[^_]+_[^_]+_openshift_",
                    "kubernetes.journal.container._openshift_",
                ))
                .section(rule("CONTAINER_NAME", "^k8s_", "kubernetes.journal.container"))
                .section(rule("_TRANSPORT", ".+", "journal.system")),
        )
        .section(
            Directive::with_arg("filter", "kubernetes.**")
                .param("@type", "kubernetes_metadata")
                .param("kubernetes_url", "'https://kubernetes.default.svc'")
                .param("cache_size", "'1000'")
                .param("watch", "'false'")
                .param("use_journal", "'nil'")
                .param("ssl_partial_chain", "'true'"),
        )
        .section(
            Directive::with_arg("filter", "kubernetes.journal.** kubernetes.var.log.containers.**")
                .param("@type", "parse_json_field")
                .param("merge_json_log", "'false'")
                .param("preserve_json_log", "'true'")
                .param("json_fields", "'log,MESSAGE'"),
        )
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "viaq_data_model")
                .param("elasticsearch_index_prefix_field", "'viaq_index_name'")
                .param("default_keep_fields", "CEE,time,@timestamp,aushape,ci_job,collectd,docker,fedora-ci,file,foreman,geoip,hostname,ipaddr4,ipaddr6,kubernetes,level,message,namespace_name,namespace_uuid,offset,openstack,ovirt,pid,pipeline_metadata,rsyslog,service,systemd,tags,testcase,tlog,viaq_msg_id")
                .param("keep_empty_fields", "'message'")
                .param("rename_time", "true")
                .param("src_time_name", "'time'")
                .param("dest_time_name", "'@timestamp'")
                .param("pipeline_type", "'collector'")
                .section(
                    Directive::new("formatter")
                        .param("tag", "\"journal.system**\"")
                        .param("type", "sys_journal"),
                )
                .section(
                    Directive::new("formatter")
                        .param("tag", "\"kubernetes.journal.container**\"")
                        .param("type", "k8s_journal"),
                )
                .section(
                    Directive::new("formatter")
                        .param("tag", "\"kubernetes.var.log.containers**\"")
                        .param("type", "k8s_json_file")
                        .param("remove_keys", "log,stream,CONTAINER_ID_FULL,CONTAINER_NAME"),
                )
                .section(index(
                    "journal.system** system.var.log** **_default_** **_kube-*_** **_openshift-*_** **_openshift_**",
                    "infra-write",
                ))
                .section(index(AUDIT_TAGS, "audit-write"))
                .section(index("**", "app-write")),
        )
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "elasticsearch_genid_ext")
                .param("hash_id_key", "viaq_msg_id")
                .param("alt_key", "kubernetes.event.metadata.uid"),
        )
        .comment("Earlier matchers remove logs so they don't fall through to later ones.")
        .section(relabel_or_discard(
            INFRA_TAGS,
            source_label(SourceType::Infrastructure),
            plan.collects(SourceType::Infrastructure),
        ))
        .section(relabel_or_discard(
            "kubernetes.**",
            source_label(SourceType::Application),
            plan.collects(SourceType::Application),
        ))
        .section(relabel_or_discard(
            AUDIT_TAGS,
            source_label(SourceType::Audit),
            plan.collects(SourceType::Audit),
        ))
        .section(Directive::with_arg("match", "**").param("@type", "null"))
}

/// `<match **>` copying every record to each of `labels`.
fn copy_to<'l>(labels: impl IntoIterator<Item = &'l String>) -> Directive {
    let stores = labels.into_iter().map(|label| {
        Directive::new("store")
            .param("@type", "relabel")
            .param("@label", label.as_str())
    });
    Directive::with_arg("match", "**")
        .param("@type", "copy")
        .sections(stores)
}

fn source_labels(source: SourceType, routes: &SourceRoutes) -> Vec<Directive> {
    let label = source_label(source);
    if routes.selected.is_empty() {
        return vec![Directive::with_arg("label", label).section(copy_to(&routes.all))];
    }

    let mut router = Directive::with_arg("match", "**").param("@type", "label_router");
    for (pipeline, namespaces) in &routes.selected {
        let namespaces = namespaces.iter().map(String::as_str).collect::<Vec<_>>();
        router = router.section(
            Directive::new("route")
                .param("@label", pipeline.as_str())
                .section(Directive::new("match").param("namespaces", namespaces.join(", "))),
        );
    }
    if routes.all.is_empty() {
        return vec![Directive::with_arg("label", label).section(router)];
    }

    router = router.section(
        Directive::new("route")
            .param("@label", APPLICATION_ALL)
            .section(Directive::new("match")),
    );
    vec![
        Directive::with_arg("label", label).section(router),
        Directive::with_arg("label", APPLICATION_ALL).section(copy_to(&routes.all)),
    ]
}

fn pipeline_label(pipeline: &PlannedPipeline) -> Directive {
    let body = if pipeline.targets.is_empty() {
        Directive::with_arg("match", "**").param("@type", "null")
    } else {
        copy_to(&pipeline.targets)
    };
    Directive::with_arg("label", pipeline.label.as_str()).section(body)
}

fn output_label(output: &PlannedOutput<'_>) -> Directive {
    match output.output_type {
        OutputType::Elasticsearch => elasticsearch_label(output),
        OutputType::FluentdForward => forward_label(output),
        OutputType::Syslog => syslog_label(output),
    }
}

fn file_buffer(path: String, queue_limit: &str, chunk_limit: &str) -> Directive {
    Directive::new("buffer")
        .param("@type", "file")
        .param("path", format!("'{path}'"))
        .param("flush_mode", "interval")
        .param("flush_interval", "1s")
        .param("flush_thread_count", "2")
        .param("flush_at_shutdown", "true")
        .param("retry_type", "exponential_backoff")
        .param("retry_wait", "1s")
        .param("retry_max_interval", "60s")
        .param("retry_forever", "true")
        .param(
            "queued_chunks_limit_size",
            format!("\"#{{ENV['BUFFER_QUEUE_LIMIT'] || '{queue_limit}'}}\""),
        )
        .param(
            "total_limit_size",
            "\"#{ENV['TOTAL_LIMIT_SIZE_PER_BUFFER'] || '8589934592'}\"",
        )
        .param(
            "chunk_limit_size",
            format!("\"#{{ENV['BUFFER_SIZE_LIMIT'] || '{chunk_limit}'}}\""),
        )
        .param("overflow_action", "block")
}

fn elasticsearch_store(output: &PlannedOutput<'_>, retry: bool) -> Directive {
    let (host, port) = output.host_port();
    let scheme = output.url.scheme();
    let id = if retry { output.retry_tag() } else { output.id() };

    let mut store = Directive::new("store")
        .param("@type", "elasticsearch")
        .param("@id", id)
        .param("host", host)
        .param("port", port.to_string())
        .param("verify_es_version_at_startup", "false")
        .param("scheme", scheme)
        .param_if(scheme == "https", "ssl_version", "TLSv1_2")
        .param("target_index_key", "viaq_index_name")
        .param("id_key", "viaq_msg_id")
        .param("remove_keys", "viaq_index_name");
    if let (Some(key), Some(cert), Some(ca)) = (
        output.secret_path("tls.key"),
        output.secret_path("tls.crt"),
        output.secret_path("ca-bundle.crt"),
    ) {
        store = store
            .param("client_key", format!("'{key}'"))
            .param("client_cert", format!("'{cert}'"))
            .param("ca_file", format!("'{ca}'"));
    }
    store
        .param("type_name", "_doc")
        .param_if(!retry, "retry_tag", output.retry_tag())
        .param("http_backend", "typhoeus")
        .param("write_operation", "create")
        .param("reload_connections", "'true'")
        .param("reload_after", "'200'")
        .param("sniffer_class_name", "'Fluent::Plugin::ElasticsearchSimpleSniffer'")
        .param("reload_on_failure", "false")
        .param("request_timeout", "2147483648")
        .section(file_buffer(output.buffer_path(retry), "32", "8m"))
}

fn elasticsearch_label(output: &PlannedOutput<'_>) -> Directive {
    Directive::with_arg("label", output.label.as_str())
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "record_modifier")
                .param("char_encoding", "ascii-8bit:utf-8"),
        )
        .comment("flatten labels to prevent field explosion in ES")
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "record_transformer")
                .param("enable_ruby", "true")
                .section(Directive::new("record").param(
                    "kubernetes",
                    "${!record['kubernetes'].nil? ? record['kubernetes'].merge({\"flat_labels\": (record['kubernetes']['labels']||{}).map{|k,v| \"#{k}=#{v}\"}}) : {} }",
                ))
                .param("remove_keys", "$.kubernetes.labels"),
        )
        .section(
            Directive::with_arg("match", output.retry_tag())
                .param("@type", "copy")
                .section(elasticsearch_store(output, true)),
        )
        .section(
            Directive::with_arg("match", "**")
                .param("@type", "copy")
                .section(elasticsearch_store(output, false)),
        )
}

fn forward_label(output: &PlannedOutput<'_>) -> Directive {
    let (host, port) = output.host_port();
    let mut forward = Directive::with_arg("match", "**")
        .param("@type", "forward")
        .param("heartbeat_type", "none")
        .param("keepalive", "true");

    if let Some(shared_key) = output.secret_path(keys::SHARED_KEY) {
        forward = forward.section(
            Directive::new("security")
                .param("self_hostname", "\"#{ENV['NODE_NAME']}\"")
                .param("shared_key", format!("\"#{{File.read('{shared_key}') rescue nil}}\"")),
        );
    }

    if output.url.scheme() == "tls" {
        forward = forward
            .param("transport", "tls")
            .param("tls_verify_hostname", "false")
            .param("tls_version", "'TLSv1_2'");
        match (
            output.secret_path("tls.key"),
            output.secret_path("tls.crt"),
            output.secret_path("ca-bundle.crt"),
        ) {
            (Some(key), Some(cert), Some(ca)) => {
                forward = forward
                    .param("tls_client_private_key_path", format!("\"{key}\""))
                    .param("tls_client_cert_path", format!("\"{cert}\""))
                    .param("tls_cert_path", format!("\"{ca}\""));
            }
            _ => forward = forward.param("tls_insecure_mode", "true"),
        }
    }

    forward = forward
        .section(file_buffer(output.buffer_path(false), "1024", "1m"))
        .section(
            Directive::new("server")
                .param("host", host)
                .param("port", port.to_string()),
        );
    Directive::with_arg("label", output.label.as_str()).section(forward)
}

fn syslog_label(output: &PlannedOutput<'_>) -> Directive {
    let (host, port) = output.host_port();
    let scheme = output.url.scheme();
    let protocol = if scheme == "udp" { "udp" } else { "tcp" };
    let rfc = output
        .spec
        .syslog
        .as_ref()
        .map_or_else(defaults::syslog_rfc, |s| s.rfc.clone());
    let facility = output
        .spec
        .syslog
        .as_ref()
        .map_or_else(defaults::syslog_facility, |s| s.facility.clone());
    let severity = output
        .spec
        .syslog
        .as_ref()
        .map_or_else(defaults::syslog_severity, |s| s.severity.clone());
    let app_name = output.spec.syslog.as_ref().and_then(|s| s.app_name.clone());

    let mut store = Directive::new("store")
        .param("@type", "remote_syslog")
        .param("@id", output.id())
        .param("host", host)
        .param("port", port.to_string())
        .param("rfc", rfc.to_ascii_lowercase())
        .param("facility", facility)
        .param("severity", severity);
    if let Some(app_name) = app_name {
        store = store.param("appname", app_name);
    }
    store = store
        .param("protocol", protocol)
        .param("packet_size", "4096")
        .param("hostname", "\"#{ENV['NODE_NAME']}\"");
    if scheme == "tls" {
        store = store.param("tls", "true");
        if let Some(ca) = output.secret_path("ca-bundle.crt") {
            store = store.param("ca_file", format!("'{ca}'"));
        }
    }
    store = store.section(
        Directive::new("format")
            .param("@type", "json")
            .param("add_newline", "false"),
    );
    if protocol == "tcp" {
        store = store.section(file_buffer(output.buffer_path(false), "1024", "1m"));
    }

    Directive::with_arg("label", output.label.as_str())
        .section(
            Directive::with_arg("filter", "**")
                .param("@type", "parse_json_field")
                .param("json_fields", "message")
                .param("merge_json_log", "false")
                .param("replace_json_log", "true"),
        )
        .section(
            Directive::with_arg("match", "**")
                .param("@type", "copy")
                .section(store),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::common::SecretReference;
    use crate::crds::forwarder::{ApplicationSource, SyslogSpec};
    use crate::crds::PipelineSpec;

    fn output(name: &str, type_: &str, url: &str, secret: Option<&str>) -> OutputSpec {
        OutputSpec {
            name: name.into(),
            type_: type_.into(),
            url: url.into(),
            secret: secret.map(|s| SecretReference { name: s.into() }),
            syslog: None,
        }
    }

    fn pipeline(name: &str, inputs: &[&str], outputs: &[&str]) -> PipelineSpec {
        PipelineSpec {
            name: name.into(),
            input_refs: inputs.iter().map(|s| s.to_string()).collect(),
            output_refs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn render(spec: &ClusterLogForwarderSpec) -> String {
        generate(spec, "openshift-logging").unwrap()
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![
                output("es", "elasticsearch", "https://es.svc:9200", Some("es-secret")),
                output("fwd", "fluentdForward", "tls://remote:24224", Some("fwd-secret")),
            ],
            pipelines: vec![
                pipeline("b", &["application", "audit"], &["es"]),
                pipeline("a", &["infrastructure"], &["fwd", "es"]),
            ],
            ..Default::default()
        };
        assert_eq!(render(&spec), render(&spec));
    }

    #[test]
    fn test_empty_spec_collects_nothing() {
        let conf = render(&ClusterLogForwarderSpec::default());
        assert!(conf.starts_with(HEADER));
        assert!(!conf.contains("@type tail"));
        assert!(!conf.contains("@type systemd"));
        assert!(!conf.contains("<label @_APPLICATION>"));
        assert!(conf.contains("<match kubernetes.**>\n    @type null\n"));
    }

    #[test]
    fn test_sources_follow_log_types() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "elasticsearch", "https://es:9200", None)],
            pipelines: vec![pipeline("audit-only", &["audit"], &["es"])],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains("@id audit-input"));
        assert!(conf.contains("@id k8s-audit-input"));
        assert!(!conf.contains("@id container-input"));
        assert!(!conf.contains("@id systemd-input"));
        assert!(conf.contains("<label @_AUDIT>"));
    }

    #[test]
    fn test_source_copies_sorted_by_pipeline() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "elasticsearch", "https://es:9200", None)],
            pipelines: vec![
                pipeline("zeta", &["application"], &["es"]),
                pipeline("alpha", &["application"], &["es"]),
            ],
            ..Default::default()
        };
        let conf = render(&spec);
        let alpha = conf.find("@label @ALPHA").unwrap();
        let zeta = conf.find("@label @ZETA").unwrap();
        assert!(alpha < zeta);
        assert!(conf.contains("<label @ZETA>\n  <match **>\n    @type copy\n    <store>\n      @type relabel\n      @label @ES\n"));
    }

    #[test]
    fn test_forward_ingest_replaces_node_sources() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "elasticsearch", "https://es:9200", None)],
            pipelines: vec![pipeline("p", &["application", "audit"], &["es"])],
            ..Default::default()
        };
        let conf = generate_with(&spec, "openshift-logging", Ingest::Forward { port: 24224 }).unwrap();
        assert!(conf.contains("<source>\n  @type forward\n  @id forward-input\n  @label @MEASURE\n  port 24224\n"));
        assert!(!conf.contains("@type tail"));
        assert!(conf.contains("<label @_APPLICATION>"));
    }

    #[test]
    fn test_container_logs_exclude_logging_components() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "elasticsearch", "https://es:9200", None)],
            pipelines: vec![pipeline("p", &["application"], &["es"])],
            ..Default::default()
        };
        let conf = generate(&spec, "logging-ns").unwrap();
        assert!(conf.contains("\"/var/log/containers/fluentd-*_logging-ns_*.log\""));
        assert!(conf.contains("\"/var/log/containers/elasticsearch-*_logging-ns_*.log\""));
    }

    #[test]
    fn test_elasticsearch_output() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("my-es", "elasticsearch", "https://es.svc:9201", Some("es-secret"))],
            pipelines: vec![pipeline("p", &["application"], &["my-es"])],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains("<label @MY_ES>"));
        assert!(conf.contains("<match retry_my_es>"));
        assert!(conf.contains("retry_tag retry_my_es"));
        assert!(conf.contains("host es.svc"));
        assert!(conf.contains("port 9201"));
        assert!(conf.contains("scheme https"));
        assert!(conf.contains("client_key '/var/run/ocp-collector/secrets/es-secret/tls.key'"));
        assert!(conf.contains("path '/var/lib/fluentd/my_es'"));
        assert!(conf.contains("path '/var/lib/fluentd/retry_my_es'"));
    }

    #[test]
    fn test_forward_output() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![
                output("secure", "forward", "tls://remote.example:24225", Some("fwd")),
                output("plain", "fluentdForward", "tcp://other", None),
            ],
            pipelines: vec![pipeline("p", &["infrastructure"], &["secure", "plain"])],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains(
            "shared_key \"#{File.read('/var/run/ocp-collector/secrets/fwd/shared_key') rescue nil}\""
        ));
        assert!(conf.contains("transport tls"));
        assert!(conf.contains("host remote.example\n      port 24225"));
        assert!(conf.contains("host other\n      port 24224"));
        assert_eq!(conf.matches("<security>").count(), 1);
        assert!(!conf.contains("tls_insecure_mode"));
    }

    #[test]
    fn test_syslog_output() {
        let mut syslog = output("rsyslog", "syslog", "udp://syslog.example:5140", None);
        syslog.syslog = Some(SyslogSpec {
            rfc: "RFC3164".into(),
            facility: "local0".into(),
            severity: "error".into(),
            app_name: Some("myapp".into()),
        });
        let spec = ClusterLogForwarderSpec {
            outputs: vec![syslog, output("default-syslog", "syslog", "tcp://s:514", None)],
            pipelines: vec![pipeline("p", &["audit"], &["rsyslog", "default-syslog"])],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains("@type remote_syslog"));
        assert!(conf.contains("rfc rfc3164"));
        assert!(conf.contains("facility local0"));
        assert!(conf.contains("appname myapp"));
        assert!(conf.contains("protocol udp"));
        assert!(conf.contains("rfc rfc5424"));
        assert!(conf.contains("severity informational"));
        assert!(conf.contains("protocol tcp"));
    }

    #[test]
    fn test_namespaced_inputs_route_by_namespace() {
        let spec = ClusterLogForwarderSpec {
            inputs: vec![InputSpec {
                name: "my-apps".into(),
                application: Some(ApplicationSource {
                    namespaces: vec!["ns-b".into(), "ns-a".into()],
                }),
                ..Default::default()
            }],
            outputs: vec![output("es", "elasticsearch", "https://es:9200", None)],
            pipelines: vec![
                pipeline("selected", &["my-apps"], &["es"]),
                pipeline("everything", &["application"], &["es"]),
            ],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains("@type label_router"));
        assert!(conf.contains("namespaces ns-a, ns-b"));
        assert!(conf.contains("<label @_APPLICATION_ALL>"));
        assert!(conf.contains("@label @EVERYTHING"));
    }

    #[test]
    fn test_label_collisions_are_disambiguated() {
        let spec = ClusterLogForwarderSpec {
            outputs: vec![
                output("es-1", "elasticsearch", "https://a:9200", None),
                output("es_1", "elasticsearch", "https://b:9200", None),
            ],
            pipelines: vec![pipeline("_application", &["application"], &["es-1", "es_1"])],
            ..Default::default()
        };
        let conf = render(&spec);
        assert!(conf.contains("<label @ES_1>"));
        assert!(conf.contains("<label @ES_1_2>"));
        assert!(conf.contains("<label @_APPLICATION_2>"));
        assert_eq!(conf.matches("<label @_APPLICATION>").count(), 1);
    }

    #[test]
    fn test_unresolvable_references_fail() {
        let spec = ClusterLogForwarderSpec {
            pipelines: vec![pipeline("p", &["application"], &["missing"])],
            ..Default::default()
        };
        assert_eq!(
            generate(&spec, "ns"),
            Err(GenerateError::UnknownReference {
                pipeline: "p".into(),
                what: "output",
                name: "missing".into(),
            })
        );

        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "kafka", "https://es:9200", None)],
            ..Default::default()
        };
        assert!(matches!(
            generate(&spec, "ns"),
            Err(GenerateError::UnsupportedOutputType { .. })
        ));

        let spec = ClusterLogForwarderSpec {
            outputs: vec![output("es", "elasticsearch", "https://bad host", None)],
            ..Default::default()
        };
        assert!(matches!(
            generate(&spec, "ns"),
            Err(GenerateError::InvalidEndpoint { .. })
        ));
    }
}
