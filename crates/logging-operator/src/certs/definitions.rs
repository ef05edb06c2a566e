//! Which keys each component secret carries.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{CertError, CertRequest};

/// One certificate/key pair stored in a component secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertDefinition {
    pub cert_key: &'static str,
    pub key_key: &'static str,
    pub common_name: &'static str,
}

/// Layout of a component secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretDefinition {
    pub name: &'static str,
    /// Keys that hold a copy of the CA certificate.
    pub ca_keys: &'static [&'static str],
    pub certs: &'static [CertDefinition],
    /// Key holding a random 32 hex character session secret.
    pub session_key: Option<&'static str>,
}

const fn cert(
    cert_key: &'static str,
    key_key: &'static str,
    common_name: &'static str,
) -> CertDefinition {
    CertDefinition {
        cert_key,
        key_key,
        common_name,
    }
}

static DEFINITIONS: &[SecretDefinition] = &[
    SecretDefinition {
        name: "fluentd",
        ca_keys: &["ca-bundle.crt"],
        certs: &[cert("tls.crt", "tls.key", "system.logging.fluentd")],
        session_key: None,
    },
    SecretDefinition {
        name: "elasticsearch",
        ca_keys: &["admin-ca"],
        certs: &[
            cert("admin-cert", "admin-key", "system.admin"),
            cert("logging-es.crt", "logging-es.key", "logging-es"),
            cert("elasticsearch.crt", "elasticsearch.key", "elasticsearch"),
        ],
        session_key: None,
    },
    SecretDefinition {
        name: "curator",
        ca_keys: &["ca", "ops-ca"],
        certs: &[
            cert("cert", "key", "system.logging.curator"),
            cert("ops-cert", "ops-key", "system.logging.curator"),
        ],
        session_key: None,
    },
    SecretDefinition {
        name: "kibana",
        ca_keys: &["ca"],
        certs: &[cert("cert", "key", "system.logging.kibana")],
        session_key: None,
    },
    SecretDefinition {
        name: "kibana-proxy",
        ca_keys: &[],
        certs: &[cert("cert", "key", "kibana-internal")],
        session_key: Some("session-secret"),
    },
];

/// All component secrets, in reconcile order.
pub fn secret_definitions() -> &'static [SecretDefinition] {
    DEFINITIONS
}

pub fn secret_definition(name: &str) -> Result<&'static SecretDefinition, CertError> {
    DEFINITIONS
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| CertError::UnknownComponent(name.to_string()))
}

/// Certificate request for `common_name`, with the subject alternative names
/// the component is reached under inside `namespace`.
pub fn cert_request(common_name: &str, namespace: &str) -> CertRequest {
    let loopback = || {
        [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ]
        .into_iter()
        .map(|ip| ip.to_string())
    };
    let service_names = |service: &str| {
        vec![
            service.to_string(),
            format!("{service}.cluster.local"),
            format!("{service}.{namespace}.svc"),
            format!("{service}.{namespace}.svc.cluster.local"),
        ]
    };

    let sans: Vec<String> = match common_name {
        "elasticsearch" => std::iter::once("localhost".to_string())
            .chain(service_names("elasticsearch"))
            .chain(service_names("elasticsearch-cluster"))
            .chain(loopback())
            .collect(),
        "logging-es" => std::iter::once("localhost".to_string())
            .chain(service_names("logging-es"))
            .chain(service_names("elasticsearch"))
            .chain(loopback())
            .collect(),
        "kibana-internal" => vec!["kibana".to_string()],
        _ => Vec::new(),
    };
    CertRequest::new(common_name).with_sans(sans)
}
