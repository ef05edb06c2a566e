//! Typed facade over the cluster API.
//!
//! Every reconcile step reads and writes cluster objects through [`ObjectStore`],
//! so the same logic runs against a live API server ([`KubeStore`]) and against
//! the [`InMemoryStore`] used by tests.

pub mod kube_store;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

pub use self::kube_store::KubeStore;
pub use self::memory::InMemoryStore;
pub use self::retry::{retry_on_conflict, ExponentialBackoff, RetryConfig};

/// Errors returned by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("operation '{operation}' still conflicting after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] ::kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether retrying the whole tick later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::RetryExhausted { .. } => true,
            StoreError::Api(::kube::Error::Api(resp)) => resp.code == 429 || resp.code >= 500,
            StoreError::Api(_) => true,
            _ => false,
        }
    }
}

/// A namespaced, typed key/value view of one kind of cluster object.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Fetch an object by name, `None` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError>;

    /// Create an object; fails with [`StoreError::AlreadyExists`].
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object; fails with [`StoreError::Conflict`] on a stale resourceVersion.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the status subresource of an object.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Delete an object by name; fails with [`StoreError::NotFound`].
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// List objects matching an equality-based label selector (`a=b,c=d`).
    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError>;
}

/// Delete an object, treating an already-missing object as success.
pub async fn delete_if_present<K: Send + Sync>(
    store: &dyn ObjectStore<K>,
    name: &str,
) -> Result<bool, StoreError> {
    match store.delete(name).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Parse an equality-based label selector into key/value pairs.
pub(crate) fn parse_selector(selector: &str) -> Result<Vec<(String, String)>, StoreError> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| StoreError::Invalid(format!("unsupported selector term '{term}'")))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
