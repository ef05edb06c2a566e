use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use super::component_labels;

/// Build a ConfigMap holding collector configuration files.
pub fn build_config_configmap(
    name: &str,
    namespace: &str,
    component: &str,
    files: BTreeMap<String, String>,
    owner_ref: Option<OwnerReference>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(component_labels(component)),
            owner_references: owner_ref.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(files),
        ..Default::default()
    }
}
