//! Builders for the objects the operator owns, and the upsert that writes them.

pub mod configmap_builder;
pub mod daemonset_builder;
pub mod deployment_builder;
pub mod pod_builder;
pub mod secret_builder;
pub mod service_builder;
pub mod upsert;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::Serialize;

use crate::constants::{annotations, labels, values};
use crate::crds::ClusterLogging;

pub use upsert::{content_hash, upsert, Artifact, UpsertOutcome};

/// Labels carried by every object of `component`.
pub fn component_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::NAME.to_string(), values::APP_NAME.to_string()),
        (labels::COMPONENT.to_string(), component.to_string()),
        (labels::MANAGED_BY.to_string(), values::MANAGED_BY.to_string()),
        (labels::PROVIDER.to_string(), values::PROVIDER.to_string()),
        (labels::LOGGING_INFRA.to_string(), component.to_string()),
    ])
}

/// Labels pods of `component` are selected by.
pub fn selector_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::NAME.to_string(), values::APP_NAME.to_string()),
        (labels::COMPONENT.to_string(), component.to_string()),
    ])
}

/// Controller reference to the ClusterLogging instance, when it has been persisted.
pub fn owner_reference(cluster: &ClusterLogging) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: ClusterLogging::api_version(&()).to_string(),
        kind: ClusterLogging::kind(&()).to_string(),
        name: cluster.metadata.name.clone()?,
        uid: cluster.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Stamp the hash of `desired_spec` onto `obj` so upserts compare by it.
pub fn stamp_content_hash<K, S>(obj: &mut K, desired_spec: &S) -> Result<(), serde_json::Error>
where
    K: Resource,
    S: Serialize,
{
    let hash = content_hash(desired_spec)?;
    obj.annotations_mut()
        .insert(annotations::CONTENT_HASH.to_string(), hash);
    Ok(())
}
