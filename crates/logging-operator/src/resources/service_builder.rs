use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{component_labels, selector_labels, stamp_content_hash};

/// Build a ClusterIP Service in front of `component`'s pods.
pub fn build_component_service(
    name: &str,
    namespace: &str,
    component: &str,
    ports: &[(&str, i32)],
    owner_ref: Option<OwnerReference>,
) -> Result<Service, serde_json::Error> {
    let ports = ports
        .iter()
        .map(|(port_name, port)| ServicePort {
            name: Some((*port_name).into()),
            port: *port,
            target_port: Some(IntOrString::Int(*port)),
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect();

    let spec = ServiceSpec {
        type_: Some("ClusterIP".into()),
        selector: Some(selector_labels(component)),
        ports: Some(ports),
        ..Default::default()
    };

    let mut service = Service {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(component_labels(component)),
            owner_references: owner_ref.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    };
    stamp_content_hash(&mut service, &spec)?;
    service.spec = Some(spec);
    Ok(service)
}
