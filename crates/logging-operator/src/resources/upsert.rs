//! Create-or-update of generated cluster objects.
//!
//! A write happens only when the live content differs from the desired
//! content. For secrets and config maps the content is the `data` field; for
//! workloads it is the content-hash annotation stamped by the builders.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::constants::annotations;
use crate::store::{retry_on_conflict, ObjectStore, RetryConfig, StoreError};

/// What [`upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
    /// The object disappeared between create and get; the next tick recreates it.
    Vanished,
}

impl UpsertOutcome {
    pub fn wrote(self) -> bool {
        matches!(self, UpsertOutcome::Created | UpsertOutcome::Updated)
    }
}

/// A generated object whose content can be compared and carried over.
pub trait Artifact: Resource + Clone + Send + Sync {
    /// Whether `live` already carries this object's content.
    fn same_content(&self, live: &Self) -> bool;

    /// Overwrite this (live) object's content with `desired`'s.
    fn take_content_from(&mut self, desired: &Self);
}

impl Artifact for Secret {
    fn same_content(&self, live: &Self) -> bool {
        self.data == live.data
    }

    fn take_content_from(&mut self, desired: &Self) {
        self.data = desired.data.clone();
        self.type_ = desired.type_.clone();
    }
}

impl Artifact for ConfigMap {
    fn same_content(&self, live: &Self) -> bool {
        self.data == live.data
    }

    fn take_content_from(&mut self, desired: &Self) {
        self.data = desired.data.clone();
    }
}

macro_rules! hashed_artifact {
    ($kind:ty) => {
        impl Artifact for $kind {
            fn same_content(&self, live: &Self) -> bool {
                content_hash_of(self).is_some() && content_hash_of(self) == content_hash_of(live)
            }

            fn take_content_from(&mut self, desired: &Self) {
                self.spec = desired.spec.clone();
                self.labels_mut().extend(desired.labels().clone());
                if let Some(hash) = content_hash_of(desired) {
                    self.annotations_mut()
                        .insert(annotations::CONTENT_HASH.to_string(), hash.to_string());
                }
            }
        }
    };
}

hashed_artifact!(Service);
hashed_artifact!(DaemonSet);
hashed_artifact!(Deployment);

fn content_hash_of<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::CONTENT_HASH))
        .map(String::as_str)
}

/// Hex SHA-256 over the JSON form of `value`.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Create `desired`, or bring the live object's content in line with it.
pub async fn upsert<K>(
    store: &dyn ObjectStore<K>,
    desired: &K,
    retry: &RetryConfig,
) -> Result<UpsertOutcome, StoreError>
where
    K: Artifact,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    let name = desired.name_any();

    match store.create(desired).await {
        Ok(_) => {
            info!(kind = %kind, name = %name, "Created");
            return Ok(UpsertOutcome::Created);
        }
        Err(e) if e.is_already_exists() => {}
        Err(e) => return Err(e),
    }

    let operation = format!("update {kind} {name}");
    let name = name.as_str();
    let outcome = retry_on_conflict(retry, &operation, || async move {
        let Some(mut live) = store.get(name).await? else {
            return Ok(UpsertOutcome::Vanished);
        };
        if desired.same_content(&live) {
            return Ok(UpsertOutcome::Unchanged);
        }
        live.take_content_from(desired);
        store.update(&live).await?;
        Ok(UpsertOutcome::Updated)
    })
    .await?;

    match outcome {
        UpsertOutcome::Updated => info!(kind = %kind, name = %name, "Updated"),
        other => debug!(kind = %kind, name = %name, outcome = ?other, "No write needed"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::store::InMemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("fluent.conf".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    fn service(name: &str, hash: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.into()),
                annotations: Some(BTreeMap::from([(
                    annotations::CONTENT_HASH.to_string(),
                    hash.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_is_unchanged() {
        let store = InMemoryStore::<ConfigMap>::new();
        let retry = RetryConfig::immediate(3);
        let desired = config_map("fluentd", "a");

        assert_eq!(
            upsert(&store, &desired, &retry).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            upsert(&store, &desired, &retry).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        let counts = store.write_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.updates, 0);
    }

    #[tokio::test]
    async fn test_upsert_updates_changed_content() {
        let store = InMemoryStore::<ConfigMap>::new();
        store.insert(config_map("fluentd", "old"));
        let retry = RetryConfig::immediate(3);

        let outcome = upsert(&store, &config_map("fluentd", "new"), &retry)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        let live = store.snapshot("fluentd").unwrap();
        assert_eq!(live.data.unwrap()["fluent.conf"], "new");
    }

    #[tokio::test]
    async fn test_upsert_retries_conflicts() {
        let store = InMemoryStore::<ConfigMap>::new();
        store.insert(config_map("fluentd", "old"));
        store.inject_conflicts(2);
        let retry = RetryConfig::immediate(5);

        let outcome = upsert(&store, &config_map("fluentd", "new"), &retry)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(store.write_counts().updates, 1);
    }

    #[tokio::test]
    async fn test_upsert_gives_up_after_bounded_conflicts() {
        let store = InMemoryStore::<ConfigMap>::new();
        store.insert(config_map("fluentd", "old"));
        store.inject_conflicts(10);

        let err = upsert(&store, &config_map("fluentd", "new"), &RetryConfig::immediate(3))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RetryExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_workloads_compare_by_content_hash() {
        let store = InMemoryStore::<Service>::new();
        let retry = RetryConfig::immediate(3);
        store.insert(service("fluentd", "aaa"));

        assert_eq!(
            upsert(&store, &service("fluentd", "aaa"), &retry).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            upsert(&store, &service("fluentd", "bbb"), &retry).await.unwrap(),
            UpsertOutcome::Updated
        );
        let live = store.snapshot("fluentd").unwrap();
        assert_eq!(live.annotations()[annotations::CONTENT_HASH], "bbb");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(&BTreeMap::from([("k", "v")])).unwrap();
        let b = content_hash(&BTreeMap::from([("k", "v")])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(&BTreeMap::from([("k", "w")])).unwrap());
    }
}
