use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA512,
};
use rsa::RsaPrivateKey;
use time::OffsetDateTime;
use tracing::debug;

use super::{add_years, pem, CertError, Certificate};
use crate::constants::{certs, keys};

/// Parameters of a component certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertRequest {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
}

impl CertRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            subject_alt_names: Vec::new(),
        }
    }

    pub fn with_sans(mut self, sans: Vec<String>) -> Self {
        self.subject_alt_names = sans;
        self
    }
}

/// The logging subsystem's signer and its serial counter.
#[derive(Clone, Debug)]
pub struct CertificateAuthority {
    cert: Certificate,
    serial: u64,
}

impl CertificateAuthority {
    /// Generate a fresh self-signed CA valid for five years from `now`.
    pub fn generate(key_bits: usize, now: OffsetDateTime) -> Result<Self, CertError> {
        let key = pem::generate_private_key(key_bits)?;
        let key_pair = signing_key_pair(&key)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(certs::SIGNER_NAME, false);
        params.serial_number = Some(SerialNumber::from(1u64));
        params.not_before = now;
        params.not_after = add_years(now, certs::CA_VALIDITY_YEARS);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.key_identifier_method = KeyIdMethod::PreSpecified(pem::key_identifier(&key)?);
        params.use_authority_key_identifier_extension = true;

        let signed = params.self_signed(&key_pair)?;
        debug!(cn = certs::SIGNER_NAME, "Generated certificate authority");
        Ok(Self {
            cert: Certificate::from_parts(signed.pem(), key)?,
            serial: 1,
        })
    }

    /// Load a CA from the data of the CA secret.
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Result<Self, CertError> {
        let text = |key: &str| -> Result<&str, CertError> {
            let bytes = data
                .get(key)
                .ok_or_else(|| CertError::parse(key, "missing from CA secret"))?;
            std::str::from_utf8(&bytes.0).map_err(|e| CertError::parse(key, e))
        };
        let cert = Certificate::from_pem(text(keys::CA_CERT)?, text(keys::CA_KEY)?)?;
        let serial = text(keys::CA_SERIAL)?
            .trim()
            .parse::<u64>()
            .map_err(|e| CertError::parse(keys::CA_SERIAL, e))?;
        if serial == 0 {
            return Err(CertError::parse(keys::CA_SERIAL, "serial must be positive"));
        }
        Ok(Self { cert, serial })
    }

    /// Data of the CA secret.
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        BTreeMap::from([
            (
                keys::CA_CERT.to_string(),
                ByteString(self.cert.cert_pem().as_bytes().to_vec()),
            ),
            (
                keys::CA_KEY.to_string(),
                ByteString(self.cert.key_pem().as_bytes().to_vec()),
            ),
            (
                keys::CA_SERIAL.to_string(),
                ByteString(self.serial.to_string().into_bytes()),
            ),
        ])
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn cert_pem(&self) -> &str {
        self.cert.cert_pem()
    }

    /// Serial number of the most recently signed certificate.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Check that this CA can be used at `now`.
    pub fn validate(&self, now: OffsetDateTime) -> Result<(), CertError> {
        self.cert.check_validity(now)?;
        self.cert.check_key_pair()?;

        let parsed = self.cert.parsed()?;
        if !parsed.is_ca() {
            return Err(CertError::Invalid("CA certificate is not a CA".into()));
        }
        let subject = self.cert.subject_cn()?;
        let issuer = self.cert.issuer_cn()?;
        if subject != certs::SIGNER_NAME || issuer != certs::SIGNER_NAME {
            return Err(CertError::Invalid(format!(
                "unexpected CA subject '{subject}' / issuer '{issuer}'"
            )));
        }
        parsed
            .verify_signature(None)
            .map_err(|e| CertError::Invalid(format!("CA is not self-signed: {e}")))?;
        Ok(())
    }

    /// Bump the serial and issue a certificate for `request` carrying it.
    pub fn issue(
        &mut self,
        request: &CertRequest,
        key_bits: usize,
        now: OffsetDateTime,
    ) -> Result<Certificate, CertError> {
        let key = pem::generate_private_key(key_bits)?;
        let key_pair = signing_key_pair(&key)?;
        let serial = self.serial + 1;

        let mut params = CertificateParams::new(request.subject_alt_names.clone())?;
        params.distinguished_name = distinguished_name(&request.common_name, true);
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = now;
        params.not_after = add_years(now, certs::COMPONENT_VALIDITY_YEARS);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.key_identifier_method = KeyIdMethod::PreSpecified(pem::key_identifier(&key)?);
        params.use_authority_key_identifier_extension = true;

        let issuer_key = signing_key_pair(self.cert.private_key())?;
        let issuer = Issuer::from_ca_cert_pem(self.cert.cert_pem(), issuer_key)?;
        let signed = params.signed_by(&key_pair, &issuer)?;

        debug!(cn = %request.common_name, serial, "Issued certificate");
        self.serial = serial;
        Certificate::from_parts(signed.pem(), key)
    }

    /// Check that `cert` is usable at `now`, was signed by this CA and names `common_name`.
    pub fn verify(
        &self,
        cert: &Certificate,
        common_name: &str,
        now: OffsetDateTime,
    ) -> Result<(), CertError> {
        cert.check_validity(now)?;
        cert.check_key_pair()?;

        let subject = cert.subject_cn()?;
        if subject != common_name {
            return Err(CertError::Invalid(format!(
                "subject '{subject}' does not match '{common_name}'"
            )));
        }
        let issuer = cert.issuer_cn()?;
        if issuer != certs::SIGNER_NAME {
            return Err(CertError::Invalid(format!("issued by '{issuer}'")));
        }

        let ca = self.cert.parsed()?;
        cert.parsed()?
            .verify_signature(Some(ca.public_key()))
            .map_err(|e| CertError::Invalid(format!("not signed by the current CA: {e}")))
    }
}

fn signing_key_pair(key: &RsaPrivateKey) -> Result<KeyPair, CertError> {
    let pkcs8 = pem::encode_private_key_pkcs8(key)?;
    Ok(KeyPair::from_pem_and_sign_algo(&pkcs8, &PKCS_RSA_SHA512)?)
}

fn distinguished_name(common_name: &str, component: bool) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    if component {
        dn.push(DnType::OrganizationName, certs::ORGANIZATION);
        dn.push(DnType::OrganizationalUnitName, certs::ORGANIZATIONAL_UNIT);
    }
    dn.push(DnType::CommonName, common_name);
    dn
}
