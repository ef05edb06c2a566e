use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use super::{component_labels, selector_labels, stamp_content_hash};

/// Build a Deployment of `replicas` copies of `template`.
pub fn build_deployment(
    name: &str,
    namespace: &str,
    component: &str,
    replicas: i32,
    template: PodTemplateSpec,
    owner_ref: Option<OwnerReference>,
) -> Result<Deployment, serde_json::Error> {
    let spec = DeploymentSpec {
        replicas: Some(replicas),
        selector: LabelSelector {
            match_labels: Some(selector_labels(component)),
            ..Default::default()
        },
        template,
        ..Default::default()
    };

    let mut deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(component_labels(component)),
            owner_references: owner_ref.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    };
    stamp_content_hash(&mut deployment, &spec)?;
    deployment.spec = Some(spec);
    Ok(deployment)
}
