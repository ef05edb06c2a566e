//! Validation and normalization of `ClusterLogForwarder` specs.
//!
//! [`normalize`] turns an untrusted forwarder spec into a sanitized one plus a
//! per-element status. It never fails: every problem becomes a condition on
//! the offending input, output or pipeline, which is then dropped or degraded.
//! Secret lookups are resolved up front into a [`SecretIndex`] so the pass
//! itself is a pure function.

pub mod inputs;
pub mod outputs;
pub mod pipelines;
pub mod url;

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::debug;

use crate::conditions::{ElementState, ElementStatus, SourceType};
use crate::constants::{names, ports};
use crate::crds::common::{condition_types, Condition, SecretReference};
use crate::crds::{
    ClusterLogForwarderSpec, ClusterLogForwarderStatus, ClusterLogging, OutputSpec, PipelineSpec,
};
use crate::store::{ObjectStore, StoreError};

/// Names and keys of the secrets outputs refer to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SecretIndex {
    secrets: BTreeMap<String, BTreeSet<String>>,
}

impl SecretIndex {
    pub fn insert<I, S>(&mut self, name: impl Into<String>, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secrets
            .insert(name.into(), keys.into_iter().map(Into::into).collect());
    }

    pub fn from_secrets(secrets: impl IntoIterator<Item = Secret>) -> Self {
        let mut index = Self::default();
        for secret in secrets {
            let keys = secret
                .data
                .iter()
                .flat_map(|d| d.keys().cloned())
                .chain(secret.string_data.iter().flat_map(|d| d.keys().cloned()))
                .collect::<Vec<_>>();
            index.insert(secret.name_any(), keys);
        }
        index
    }

    pub fn exists(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    pub fn has_key(&self, name: &str, key: &str) -> bool {
        self.secrets.get(name).is_some_and(|keys| keys.contains(key))
    }
}

/// Look up every secret the spec's outputs reference.
pub async fn fetch_referenced_secrets(
    spec: &ClusterLogForwarderSpec,
    secrets: &dyn ObjectStore<Secret>,
) -> Result<SecretIndex, StoreError> {
    let wanted: BTreeSet<&str> = spec
        .outputs
        .iter()
        .filter_map(|o| o.secret.as_ref())
        .map(|s| s.name.as_str())
        .filter(|name| !name.is_empty())
        .collect();

    let mut found = Vec::new();
    for name in wanted {
        if let Some(secret) = secrets.get(name).await? {
            found.push(secret);
        }
    }
    Ok(SecretIndex::from_secrets(found))
}

/// What the normalizer needs to know about the cluster.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub namespace: &'a str,
    /// Whether an in-cluster elasticsearch log store is declared.
    pub has_log_store: bool,
    pub secrets: &'a SecretIndex,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(namespace: &'a str, has_log_store: bool, secrets: &'a SecretIndex) -> Self {
        Self {
            namespace,
            has_log_store,
            secrets,
        }
    }

    pub fn for_cluster(cluster: &ClusterLogging, namespace: &'a str, secrets: &'a SecretIndex) -> Self {
        Self::new(namespace, cluster.has_log_store(), secrets)
    }
}

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub spec: ClusterLogForwarderSpec,
    pub status: ClusterLogForwarderStatus,
}

/// Output forwarding to the in-cluster log store.
pub fn default_output(namespace: &str) -> OutputSpec {
    OutputSpec {
        name: names::DEFAULT_OUTPUT.to_string(),
        type_: "elasticsearch".to_string(),
        url: format!(
            "https://{}.{namespace}.svc:{}",
            names::LOG_STORE,
            ports::LOG_STORE
        ),
        secret: Some(SecretReference {
            name: names::COLLECTOR_SECRET.to_string(),
        }),
        syslog: None,
    }
}

/// Pipeline sending application and infrastructure logs to [`default_output`].
pub fn default_pipeline() -> PipelineSpec {
    PipelineSpec {
        name: "pipeline[0]".to_string(),
        input_refs: vec![
            SourceType::Application.as_str().to_string(),
            SourceType::Infrastructure.as_str().to_string(),
        ],
        output_refs: vec![names::DEFAULT_OUTPUT.to_string()],
    }
}

/// Validate `spec` and produce its sanitized form and status.
pub fn normalize(spec: &ClusterLogForwarderSpec, ctx: &NormalizeContext<'_>) -> Normalized {
    if ctx.has_log_store && spec.is_empty() && !spec.disable_default_forwarding {
        debug!("Forwarding to the default log store");
        let sanitized = ClusterLogForwarderSpec {
            outputs: vec![default_output(ctx.namespace)],
            pipelines: vec![default_pipeline()],
            ..Default::default()
        };
        let mut status = ClusterLogForwarderStatus::default();
        status
            .outputs
            .insert(names::DEFAULT_OUTPUT.to_string(), ElementStatus::accepted());
        status
            .pipelines
            .insert(default_pipeline().name, ElementStatus::accepted());
        return finalize(sanitized, status, &inputs::AcceptedInputs::default());
    }

    let mut status = ClusterLogForwarderStatus::default();
    let accepted_inputs = inputs::gather(&spec.inputs, &mut status.inputs);
    let mut accepted_outputs = outputs::gather(&spec.outputs, ctx, &mut status.outputs);
    outputs::inject_referenced_default(
        &spec.pipelines,
        &spec.outputs,
        ctx,
        &mut accepted_outputs,
        &mut status.outputs,
    );
    let pipelines = pipelines::gather(
        &spec.pipelines,
        &accepted_inputs,
        &accepted_outputs,
        &mut status.pipelines,
    );

    let mut sanitized = ClusterLogForwarderSpec {
        inputs: accepted_inputs.specs.clone(),
        outputs: accepted_outputs.specs,
        pipelines,
        disable_default_forwarding: spec.disable_default_forwarding,
    };
    // A declared spec that sanitizes to nothing must not turn into default
    // forwarding when normalized again.
    if sanitized.is_empty() && !spec.is_empty() {
        sanitized.disable_default_forwarding = true;
    }
    finalize(sanitized, status, &accepted_inputs)
}

/// Record built-in inputs used by emitted pipelines, the routed log sources and
/// the resource-level conditions.
fn finalize(
    spec: ClusterLogForwarderSpec,
    mut status: ClusterLogForwarderStatus,
    inputs: &inputs::AcceptedInputs,
) -> Normalized {
    let mut sources = BTreeSet::new();
    for pipeline in &spec.pipelines {
        for input in &pipeline.input_refs {
            if SourceType::parse(input).is_some() {
                status
                    .inputs
                    .entry(input.clone())
                    .or_insert_with(ElementStatus::accepted);
            }
            sources.extend(inputs.resolve(input));
        }
    }
    status.log_sources = sources.into_iter().collect();

    let troubled = status
        .inputs
        .values()
        .chain(status.outputs.values())
        .chain(status.pipelines.values())
        .filter(|e| e.state != ElementState::Accepted)
        .count();

    let ready = if spec.pipelines.is_empty() {
        Condition::new(
            condition_types::READY,
            false,
            "NoValidPipelines",
            "no valid pipelines to forward logs through",
        )
    } else {
        Condition::new(
            condition_types::READY,
            true,
            "Ready",
            "all pipelines are forwarding",
        )
    };
    let degraded = if troubled > 0 {
        Condition::new(
            condition_types::DEGRADED,
            true,
            "InvalidElements",
            format!("{troubled} inputs, outputs or pipelines were dropped or degraded"),
        )
    } else {
        Condition::new(condition_types::DEGRADED, false, "Valid", "")
    };
    status.conditions = vec![ready, degraded];

    Normalized { spec, status }
}

/// Key under which an element appears in the status: its name when usable,
/// `kind[index]` otherwise, disambiguated against keys already taken.
pub(crate) fn status_key(
    status: &BTreeMap<String, ElementStatus>,
    name: Option<&str>,
    kind: &str,
    index: usize,
) -> String {
    if let Some(name) = name.filter(|n| !n.is_empty() && !status.contains_key(*n)) {
        return name.to_string();
    }
    let base = format!("{kind}[{index}]");
    let mut key = base.clone();
    let mut n = 1;
    while status.contains_key(&key) {
        key = format!("{base}-{n}");
        n += 1;
    }
    key
}
