use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, RollingUpdateDaemonSet,
};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{component_labels, selector_labels, stamp_content_hash};

/// Build a DaemonSet running `template` on every eligible node.
pub fn build_daemonset(
    name: &str,
    namespace: &str,
    component: &str,
    template: PodTemplateSpec,
    owner_ref: Option<OwnerReference>,
) -> Result<DaemonSet, serde_json::Error> {
    let spec = DaemonSetSpec {
        selector: LabelSelector {
            match_labels: Some(selector_labels(component)),
            ..Default::default()
        },
        template,
        update_strategy: Some(DaemonSetUpdateStrategy {
            type_: Some("RollingUpdate".into()),
            rolling_update: Some(RollingUpdateDaemonSet {
                max_unavailable: Some(IntOrString::String("100%".into())),
                ..Default::default()
            }),
        }),
        min_ready_seconds: Some(10),
        ..Default::default()
    };

    let mut daemonset = DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(component_labels(component)),
            owner_references: owner_ref.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    };
    stamp_content_hash(&mut daemonset, &spec)?;
    daemonset.spec = Some(spec);
    Ok(daemonset)
}
