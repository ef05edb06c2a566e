use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use rand::RngCore;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::definitions::{cert_request, secret_definition, SecretDefinition};
use super::{CertError, Certificate, CertificateAuthority, KeyPolicy};
use crate::constants::{certs, names};
use crate::resources::secret_builder::build_secret;
use crate::resources::upsert;
use crate::store::{ObjectStore, RetryConfig};

/// Result of reconciling one component secret.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SecretOutcome {
    /// Certificates newly issued for the secret.
    pub issued: usize,
    /// Whether the secret was created or updated.
    pub written: bool,
}

/// Keeps the CA secret and the component secrets consistent with each other.
pub struct CertificateManager<'a> {
    secrets: &'a dyn ObjectStore<Secret>,
    namespace: &'a str,
    policy: &'a KeyPolicy,
    retry: &'a RetryConfig,
    owner: Option<OwnerReference>,
}

impl<'a> CertificateManager<'a> {
    pub fn new(
        secrets: &'a dyn ObjectStore<Secret>,
        namespace: &'a str,
        policy: &'a KeyPolicy,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            secrets,
            namespace,
            policy,
            retry,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner = owner;
        self
    }

    /// Return the CA in effect.
    ///
    /// `cached` is reused when it is exactly what the CA secret holds. A
    /// missing, unparseable or invalid CA is replaced by a fresh one, which is
    /// persisted before it is returned.
    pub async fn ensure_ca(
        &self,
        cached: Option<&CertificateAuthority>,
        now: OffsetDateTime,
    ) -> Result<CertificateAuthority, CertError> {
        let live = self.secrets.get(names::CA_SECRET).await?;
        let data = live.and_then(|s| s.data).unwrap_or_default();

        if !data.is_empty() {
            let loaded = match cached {
                Some(ca) if ca.to_secret_data() == data => Ok(ca.clone()),
                _ => CertificateAuthority::from_secret_data(&data),
            };
            match loaded.and_then(|ca| ca.validate(now).map(|()| ca)) {
                Ok(ca) => return Ok(ca),
                Err(e) if e.is_recoverable_by_regeneration() => {
                    warn!(secret = names::CA_SECRET, error = %e, "Replacing unusable certificate authority");
                }
                Err(e) => return Err(e),
            }
        }

        let ca = CertificateAuthority::generate(self.policy.ca_key_bits, now)?;
        self.persist_ca(&ca).await?;
        info!(secret = names::CA_SECRET, "Generated new certificate authority");
        Ok(ca)
    }

    /// Write the CA certificate, key and serial counter to the CA secret.
    pub async fn persist_ca(&self, ca: &CertificateAuthority) -> Result<(), CertError> {
        let secret = build_secret(
            names::CA_SECRET,
            self.namespace,
            ca.to_secret_data(),
            self.owner.clone(),
        );
        upsert(self.secrets, &secret, self.retry).await?;
        Ok(())
    }

    /// Bring the secret of `component` in line with `ca`.
    ///
    /// CA keys get the current CA certificate, certificates that do not verify
    /// against `ca` are reissued and a missing session secret is generated. The
    /// bumped serial is persisted before the component secret is written.
    pub async fn reconcile_secret(
        &self,
        ca: &mut CertificateAuthority,
        component: &str,
        now: OffsetDateTime,
    ) -> Result<SecretOutcome, CertError> {
        let def = secret_definition(component)?;
        let live = self.secrets.get(def.name).await?;
        let live_data = live.as_ref().and_then(|s| s.data.clone());
        let mut data = live_data.clone().unwrap_or_default();

        let issued = self.fill_secret_data(def, &mut data, ca, now)?;
        if issued > 0 {
            self.persist_ca(ca).await?;
        }

        if live.is_some() && live_data.as_ref() == Some(&data) {
            debug!(secret = def.name, "Secret is current");
            return Ok(SecretOutcome {
                issued,
                written: false,
            });
        }

        let desired = build_secret(def.name, self.namespace, data, self.owner.clone());
        let outcome = upsert(self.secrets, &desired, self.retry).await?;
        Ok(SecretOutcome {
            issued,
            written: outcome.wrote(),
        })
    }

    fn fill_secret_data(
        &self,
        def: &SecretDefinition,
        data: &mut BTreeMap<String, ByteString>,
        ca: &mut CertificateAuthority,
        now: OffsetDateTime,
    ) -> Result<usize, CertError> {
        let ca_pem = ByteString(ca.cert_pem().as_bytes().to_vec());
        for key in def.ca_keys {
            if data.get(*key) != Some(&ca_pem) {
                data.insert((*key).to_string(), ca_pem.clone());
            }
        }

        let mut issued = 0;
        for cert_def in def.certs {
            let existing = existing_certificate(data, cert_def.cert_key, cert_def.key_key)
                .and_then(|cert| ca.verify(&cert, cert_def.common_name, now));
            match existing {
                Ok(()) => continue,
                Err(e) if e.is_recoverable_by_regeneration() => {
                    debug!(secret = def.name, cn = cert_def.common_name, reason = %e, "Issuing certificate");
                }
                Err(e) => return Err(e),
            }
            let request = cert_request(cert_def.common_name, self.namespace);
            let cert = ca.issue(&request, self.policy.component_key_bits, now)?;
            data.insert(
                cert_def.cert_key.to_string(),
                ByteString(cert.cert_pem().as_bytes().to_vec()),
            );
            data.insert(
                cert_def.key_key.to_string(),
                ByteString(cert.key_pem().as_bytes().to_vec()),
            );
            issued += 1;
        }

        if let Some(key) = def.session_key {
            let current = data.get(key).map(|v| v.0.as_slice()).unwrap_or_default();
            if !is_session_key(current) {
                data.insert(key.to_string(), ByteString(new_session_key().into_bytes()));
            }
        }
        Ok(issued)
    }
}

fn existing_certificate(
    data: &BTreeMap<String, ByteString>,
    cert_key: &str,
    key_key: &str,
) -> Result<Certificate, CertError> {
    let text = |key: &str| -> Result<&str, CertError> {
        let bytes = data
            .get(key)
            .ok_or_else(|| CertError::parse(key, "missing"))?;
        std::str::from_utf8(&bytes.0).map_err(|e| CertError::parse(key, e))
    };
    Certificate::from_pem(text(cert_key)?, text(key_key)?)
}

fn is_session_key(value: &[u8]) -> bool {
    value.len() == certs::SESSION_KEY_BYTES * 2 && value.iter().all(u8::is_ascii_hexdigit)
}

fn new_session_key() -> String {
    let mut bytes = [0u8; certs::SESSION_KEY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
