use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, ResourceRequirements, Toleration};

/// Desired logging subsystem for a namespace.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logging.openshift.io",
    version = "v1",
    kind = "ClusterLogging",
    namespaced,
    status = "ClusterLoggingStatus",
    shortname = "cl",
    printcolumn = r#"{"name":"Management State","type":"string","jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Topology","type":"string","jsonPath":".status.topology"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoggingSpec {
    /// Whether the operator manages this instance.
    #[serde(default = "super::defaults::management_state")]
    pub management_state: ManagementState,

    /// In-cluster log store.
    #[serde(default)]
    pub log_store: Option<LogStoreSpec>,

    /// Log visualization.
    #[serde(default)]
    pub visualization: Option<VisualizationSpec>,

    /// Log curation.
    #[serde(default)]
    pub curation: Option<CurationSpec>,

    /// Log collection.
    #[serde(default)]
    pub collection: Option<CollectionSpec>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

/// Log store configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogStoreSpec {
    #[serde(rename = "type")]
    pub type_: LogStoreType,

    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreType {
    Elasticsearch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    #[serde(default = "super::defaults::node_count")]
    pub node_count: i32,

    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

/// Visualization configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSpec {
    #[serde(rename = "type")]
    pub type_: VisualizationType,

    #[serde(default)]
    pub kibana: Option<KibanaSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    Kibana,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    #[serde(default = "super::defaults::kibana_replicas")]
    pub replicas: i32,
}

/// Curation configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurationSpec {
    #[serde(rename = "type")]
    pub type_: CurationType,

    #[serde(default)]
    pub curator: Option<CuratorSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CurationType {
    Curator,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CuratorSpec {
    /// Cron schedule.
    #[serde(default = "super::defaults::curator_schedule")]
    pub schedule: String,
}

/// Collection configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    pub logs: LogCollectionSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectionSpec {
    #[serde(rename = "type")]
    pub type_: CollectorType,

    #[serde(default)]
    pub fluentd: Option<FluentdSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CollectorType {
    Fluentd,
    Fluentbit,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FluentdSpec {
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,

    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

/// Observed state of a ClusterLogging instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoggingStatus {
    /// Topology currently deployed; compared with the annotation to detect a switch.
    #[serde(default)]
    pub topology: Option<String>,

    /// Collector deployment details.
    #[serde(default)]
    pub collector: Option<CollectorStatus>,

    /// Last observed generation of the spec.
    #[serde(default)]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    /// Name of the collector DaemonSet.
    #[serde(default)]
    pub daemon_set: Option<String>,

    /// Hash of the generated collector configuration.
    #[serde(default)]
    pub config_hash: Option<String>,
}

impl ClusterLogging {
    /// Whether an in-cluster elasticsearch log store is declared.
    pub fn has_log_store(&self) -> bool {
        matches!(
            self.spec.log_store,
            Some(LogStoreSpec {
                type_: LogStoreType::Elasticsearch,
                ..
            })
        )
    }

    pub fn collector_type(&self) -> CollectorType {
        self.spec
            .collection
            .as_ref()
            .map(|c| c.logs.type_)
            .unwrap_or(CollectorType::Fluentd)
    }

    pub fn fluentd_spec(&self) -> FluentdSpec {
        self.spec
            .collection
            .as_ref()
            .and_then(|c| c.logs.fluentd.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_generates_valid_schema() {
        let crd = ClusterLogging::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("ClusterLogging"));
        assert!(yaml.contains("logging.openshift.io"));
        assert!(yaml.contains("managementState"));
    }

    #[test]
    fn test_spec_defaults() {
        let spec: ClusterLoggingSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.management_state, ManagementState::Managed);
        assert!(spec.log_store.is_none());
        assert!(spec.collection.is_none());
    }

    #[test]
    fn test_full_spec_parses() {
        let spec: ClusterLoggingSpec = serde_json::from_value(serde_json::json!({
            "managementState": "Managed",
            "logStore": {"type": "elasticsearch", "elasticsearch": {"nodeCount": 3}},
            "visualization": {"type": "kibana"},
            "curation": {"type": "curator", "curator": {}},
            "collection": {"logs": {"type": "fluentd", "fluentd": {
                "nodeSelector": {"logging": "true"},
                "tolerations": [{"key": "node-role", "operator": "Exists"}]
            }}}
        }))
        .unwrap();
        let cl = ClusterLogging::new("instance", spec);
        assert!(cl.has_log_store());
        assert_eq!(cl.collector_type(), CollectorType::Fluentd);
        assert_eq!(cl.fluentd_spec().tolerations.len(), 1);
        assert_eq!(
            cl.spec.curation.unwrap().curator.unwrap().schedule,
            "30 3 * * *"
        );
    }
}
