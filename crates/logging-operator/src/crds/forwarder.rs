use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, SecretReference};
use crate::conditions::{ElementStatus, SourceType};

/// Where the collector sends logs: inputs, outputs and the pipelines joining them.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logging.openshift.io",
    version = "v1",
    kind = "ClusterLogForwarder",
    namespaced,
    status = "ClusterLogForwarderStatus",
    shortname = "clf",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogForwarderSpec {
    /// Named log sources beyond the built-in `application`, `infrastructure`, `audit`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputSpec>,

    /// Log sinks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,

    /// Bindings from inputs to outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<PipelineSpec>,

    /// Do not forward to the in-cluster log store when nothing else is configured.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_default_forwarding: bool,
}

impl ClusterLogForwarderSpec {
    /// True when no inputs, outputs or pipelines are declared.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.pipelines.is_empty()
    }
}

/// A log sink.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    #[serde(default)]
    pub name: String,

    /// One of `elasticsearch`, `fluentdForward` (alias `forward`), `syslog`.
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Endpoint URL, or `host:port`.
    #[serde(default)]
    pub url: String,

    /// Secret holding TLS material or the forward shared key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog: Option<SyslogSpec>,
}

/// Syslog-specific output tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyslogSpec {
    #[serde(default = "super::defaults::syslog_rfc")]
    pub rfc: String,

    #[serde(default = "super::defaults::syslog_facility")]
    pub facility: String,

    #[serde(default = "super::defaults::syslog_severity")]
    pub severity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

/// A named log source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<InfrastructureSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditSource>,
}

impl InputSpec {
    /// Source types selected by this input.
    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types = Vec::new();
        if self.application.is_some() {
            types.push(SourceType::Application);
        }
        if self.infrastructure.is_some() {
            types.push(SourceType::Infrastructure);
        }
        if self.audit.is_some() {
            types.push(SourceType::Audit);
        }
        types
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationSource {
    /// Restrict to these namespaces; empty means all application namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InfrastructureSource {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditSource {}

/// Routes logs from inputs to outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub input_refs: Vec<String>,

    #[serde(default)]
    pub output_refs: Vec<String>,
}

/// Per-element validation results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogForwarderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub inputs: BTreeMap<String, ElementStatus>,

    #[serde(default)]
    pub outputs: BTreeMap<String, ElementStatus>,

    #[serde(default)]
    pub pipelines: BTreeMap<String, ElementStatus>,

    /// Source types routed by the emitted pipelines.
    #[serde(default)]
    pub log_sources: Vec<SourceType>,

    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ClusterLogForwarderStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(super::common::condition_types::READY)
            .is_some_and(Condition::is_true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_generates_valid_schema() {
        let crd = ClusterLogForwarder::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("ClusterLogForwarder"));
        assert!(yaml.contains("outputRefs"));
        assert!(yaml.contains("clf"));
    }

    #[test]
    fn test_spec_parses_wire_shape() {
        let spec: ClusterLogForwarderSpec = serde_json::from_value(serde_json::json!({
            "outputs": [{"name": "remote", "type": "forward", "url": "tls://fluentd:24224",
                         "secret": {"name": "fwd"}}],
            "pipelines": [{"name": "apps", "inputRefs": ["application"], "outputRefs": ["remote"]}],
            "inputs": [{"name": "mine", "application": {"namespaces": ["a", "b"]}}]
        }))
        .unwrap();
        assert_eq!(spec.outputs[0].type_, "forward");
        assert_eq!(spec.outputs[0].secret.as_ref().unwrap().name, "fwd");
        assert_eq!(spec.pipelines[0].input_refs, vec!["application"]);
        assert_eq!(spec.inputs[0].source_types(), vec![SourceType::Application]);
        assert!(!spec.disable_default_forwarding);
    }

    #[test]
    fn test_empty_spec() {
        let spec: ClusterLogForwarderSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.is_empty());
        assert_eq!(serde_json::to_string(&spec).unwrap(), "{}");
    }
}
