//! Certificate authority and component certificates.
//!
//! The logging subsystem runs its own self-signed CA. Its certificate, key and
//! serial counter live in the `master-certs` secret; every component secret
//! carries certificates issued by it. Anything that fails to parse or validate
//! is regenerated rather than reported, so a tick always converges on a usable
//! set of credentials.

pub mod authority;
pub mod definitions;
pub mod manager;
pub mod pem;

use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::public_key::PublicKey;

use crate::constants;
use crate::store::StoreError;

pub use authority::{CertRequest, CertificateAuthority};
pub use definitions::{secret_definition, secret_definitions, CertDefinition, SecretDefinition};
pub use manager::{CertificateManager, SecretOutcome};

#[derive(Error, Debug)]
pub enum CertError {
    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("PKCS#1 encoding error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    #[error("PKCS#8 encoding error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("PEM encoding error: {0}")]
    Pem(String),

    #[error("certificate signing failed: {0}")]
    Signing(#[from] rcgen::Error),

    #[error("unable to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("invalid certificate: {0}")]
    Invalid(String),

    #[error("unknown secret definition '{0}'")]
    UnknownComponent(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CertError {
    fn parse(what: &str, message: impl ToString) -> Self {
        CertError::Parse {
            what: what.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the failure concerns existing material (regenerate) rather than
    /// the machinery (abort the tick).
    pub fn is_recoverable_by_regeneration(&self) -> bool {
        matches!(self, CertError::Parse { .. } | CertError::Invalid(_))
    }
}

/// RSA key sizes used for new keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPolicy {
    pub ca_key_bits: usize,
    pub component_key_bits: usize,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            ca_key_bits: constants::certs::CA_KEY_BITS,
            component_key_bits: constants::certs::COMPONENT_KEY_BITS,
        }
    }
}

impl KeyPolicy {
    /// Smallest sizes the signer accepts; keeps test key generation fast.
    pub fn fast() -> Self {
        Self {
            ca_key_bits: 2048,
            component_key_bits: 2048,
        }
    }
}

/// A certificate together with its private key.
#[derive(Clone)]
pub struct Certificate {
    cert_pem: String,
    key_pem: String,
    der: Vec<u8>,
    key: RsaPrivateKey,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Decode a PEM certificate and PEM private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let der = pem::decode_certificate(cert_pem)?;
        let key = pem::decode_private_key(key_pem)?;
        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            der,
            key,
        })
    }

    pub(crate) fn from_parts(cert_pem: String, key: RsaPrivateKey) -> Result<Self, CertError> {
        let der = pem::decode_certificate(&cert_pem)?;
        let key_pem = pem::encode_private_key(&key)?;
        Ok(Self {
            cert_pem,
            key_pem,
            der,
            key,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    pub fn parsed(&self) -> Result<X509Certificate<'_>, CertError> {
        x509_parser::parse_x509_certificate(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| CertError::parse("certificate", e))
    }

    pub fn subject_cn(&self) -> Result<String, CertError> {
        let cert = self.parsed()?;
        common_name(cert.subject())
    }

    pub fn issuer_cn(&self) -> Result<String, CertError> {
        let cert = self.parsed()?;
        common_name(cert.issuer())
    }

    pub fn not_before(&self) -> Result<OffsetDateTime, CertError> {
        Ok(self.parsed()?.validity().not_before.to_datetime())
    }

    pub fn not_after(&self) -> Result<OffsetDateTime, CertError> {
        Ok(self.parsed()?.validity().not_after.to_datetime())
    }

    /// Fail unless `not_before <= now < not_after`.
    pub fn check_validity(&self, now: OffsetDateTime) -> Result<(), CertError> {
        let not_before = self.not_before()?;
        let not_after = self.not_after()?;
        if now < not_before {
            return Err(CertError::Invalid(format!(
                "certificate not valid before {not_before}"
            )));
        }
        if now >= not_after {
            return Err(CertError::Invalid(format!("certificate expired at {not_after}")));
        }
        Ok(())
    }

    /// Fail unless the certificate's public key is the private key's public half.
    pub fn check_key_pair(&self) -> Result<(), CertError> {
        let cert = self.parsed()?;
        let public = cert
            .public_key()
            .parsed()
            .map_err(|e| CertError::parse("public key", e))?;
        let PublicKey::RSA(rsa) = public else {
            return Err(CertError::Invalid("certificate key is not RSA".into()));
        };
        let key_modulus = self.key.n().to_bytes_be();
        if strip_leading_zeros(rsa.modulus) != strip_leading_zeros(&key_modulus) {
            return Err(CertError::Invalid(
                "public key does not match private key".into(),
            ));
        }
        Ok(())
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn common_name(name: &x509_parser::x509::X509Name<'_>) -> Result<String, CertError> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .ok_or_else(|| CertError::Invalid("certificate has no common name".into()))
}

/// Current time truncated to whole seconds, the resolution of X.509 validity.
pub fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

/// Add calendar years, clamping Feb 29 to Feb 28.
pub(crate) fn add_years(t: OffsetDateTime, years: i32) -> OffsetDateTime {
    let target = t.year() + years;
    t.replace_year(target)
        .or_else(|_| t.replace_day(28).and_then(|d| d.replace_year(target)))
        .unwrap_or_else(|_| t + time::Duration::days(365 * i64::from(years)))
}
