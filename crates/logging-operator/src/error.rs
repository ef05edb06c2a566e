use thiserror::Error;

use crate::certs::CertError;
use crate::generator::GenerateError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertError),

    #[error("Collector configuration error: {0}")]
    Generate(#[from] GenerateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reconciliation error: {0}")]
    Reconcile(String),

    #[error("Finalizer error: {0}")]
    Finalizer(String),
}

pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Whether this error is transient and the reconciliation should be retried soon.
    pub fn is_transient(&self) -> bool {
        match self {
            OperatorError::Kube(_) => true,
            OperatorError::Store(e) => e.is_transient(),
            OperatorError::Certificate(CertError::Store(e)) => e.is_transient(),
            _ => false,
        }
    }

    /// Short machine-readable reason used on status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::Kube(_) | OperatorError::Store(_) => "StoreError",
            OperatorError::Certificate(_) => "CertificateError",
            OperatorError::Generate(_) => "CollectorConfigError",
            OperatorError::Serialization(_) | OperatorError::Yaml(_) => "SerializationError",
            OperatorError::Config(_) => "InvalidConfiguration",
            OperatorError::Reconcile(_) | OperatorError::Finalizer(_) => "ReconcileError",
        }
    }
}
