//! Kube-backed store: resolves kinds through discovery and talks to the API server
//! with `Api<DynamicObject>`.

use anyhow::Result;
use async_trait::async_trait;
use keel_core::{ManagedObject, ObjectKey, StoreError};
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{self, Scope},
    Client,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{key_of, ObjectStore};

pub struct KubeStore {
    client: Client,
    /// apiVersion/kind -> (resource, namespaced)
    resources: RwLock<FxHashMap<String, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(FxHashMap::default()) }
    }

    /// Store for the current kube context.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        info!("kube store connected");
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client { self.client.clone() }

    async fn resolve(&self, key: &ObjectKey) -> Result<(ApiResource, bool), StoreError> {
        let cache_key = format!("{}/{}", key.api_version, key.kind);
        if let Some(hit) = self.resources.read().await.get(&cache_key) {
            return Ok(hit.clone());
        }
        let gvk = key.gvk();
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk).await.map_err(|e| map_err(key, e))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(gvk = %cache_key, plural = %ar.plural, namespaced, "resolved api resource");
        self.resources.write().await.insert(cache_key, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.resolve(key).await?;
        if !namespaced {
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        match key.namespace.as_deref() {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
            None => Err(StoreError::Invalid(format!("{}: namespace required for namespaced kind", key))),
        }
    }
}

fn map_err(key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(key.to_string()),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => StoreError::AlreadyExists(key.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(format!("{}: {}", key, ae.message)),
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => StoreError::Invalid(format!("{}: {}", key, ae.message)),
        other => StoreError::Unavailable(format!("{}: {}", key, other)),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, StoreError> {
        counter!("store_calls_total", 1u64, "verb" => "get");
        let api = self.api_for(key).await?;
        api.get(&key.name).await.map_err(|e| map_err(key, e))
    }

    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError> {
        counter!("store_calls_total", 1u64, "verb" => "create");
        let key = key_of(obj)?;
        let api = self.api_for(&key).await?;
        api.create(&PostParams::default(), obj).await.map_err(|e| map_err(&key, e))
    }

    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError> {
        counter!("store_calls_total", 1u64, "verb" => "update");
        let key = key_of(obj)?;
        let api = self.api_for(&key).await?;
        api.replace(&key.name, &PostParams::default(), obj).await.map_err(|e| map_err(&key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        counter!("store_calls_total", 1u64, "verb" => "delete");
        let api = self.api_for(key).await?;
        api.delete(&key.name, &DeleteParams::default()).await.map(|_| ()).map_err(|e| map_err(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "msg".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn api_errors_map_to_store_taxonomy() {
        let key = ObjectKey::new("v1", "Service", Some("ns"), "svc");
        assert!(map_err(&key, api_err(404, "NotFound")).is_not_found());
        assert!(matches!(map_err(&key, api_err(409, "AlreadyExists")), StoreError::AlreadyExists(_)));
        assert!(matches!(map_err(&key, api_err(409, "Conflict")), StoreError::Conflict(_)));
        assert!(matches!(map_err(&key, api_err(422, "Invalid")), StoreError::Invalid(_)));
        assert!(matches!(map_err(&key, api_err(503, "ServiceUnavailable")), StoreError::Unavailable(_)));
    }
}
