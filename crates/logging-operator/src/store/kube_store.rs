use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ErrorResponse;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ObjectStore, StoreError};

/// [`ObjectStore`] backed by a namespaced `kube::Api`.
pub struct KubeStore<K> {
    api: Api<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    fn kind() -> String {
        K::kind(&Default::default()).to_string()
    }

    /// Translate API failures into the store vocabulary.
    fn map_error(err: kube::Error, name: &str) -> StoreError {
        match err {
            kube::Error::Api(ErrorResponse { code: 404, .. }) => StoreError::NotFound {
                kind: Self::kind(),
                name: name.to_string(),
            },
            kube::Error::Api(ErrorResponse {
                code: 409,
                ref reason,
                ..
            }) if reason == "AlreadyExists" => StoreError::AlreadyExists {
                kind: Self::kind(),
                name: name.to_string(),
            },
            kube::Error::Api(ErrorResponse {
                code: 409,
                ref message,
                ..
            }) => StoreError::Conflict {
                kind: Self::kind(),
                name: name.to_string(),
                message: message.clone(),
            },
            other => StoreError::Api(other),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| Self::map_error(e, name))
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        debug!(kind = %Self::kind(), name = %name, "Creating object");
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::map_error(e, &name))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        debug!(kind = %Self::kind(), name = %name, "Replacing object");
        self.api
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::map_error(e, &name))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let body = serde_json::to_vec(obj)?;
        debug!(kind = %Self::kind(), name = %name, "Replacing status");
        self.api
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| Self::map_error(e, &name))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        debug!(kind = %Self::kind(), name = %name, "Deleting object");
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Self::map_error(e, name))
    }

    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default().labels(selector);
        self.api
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| Self::map_error(e, selector))
    }
}
