use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;

use crate::constants::labels;

/// Build an Opaque secret owned by the logging subsystem.
pub fn build_secret(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, ByteString>,
    owner_ref: Option<OwnerReference>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(BTreeMap::from([(
                labels::LOGGING_INFRA.to_string(),
                "support".to_string(),
            )])),
            owner_references: owner_ref.map(|o| vec![o]),
            ..Default::default()
        },
        type_: Some("Opaque".into()),
        data: Some(data),
        ..Default::default()
    }
}
