//! Access to the cluster's API server.
//!
//! Reconcilers only talk to the API server through [`Store`], so that passes
//! can be exercised against an in-memory store.

use crate::k8s::{self, Api, Patch, PatchParams, PostParams, Resource, ResourceExt};
use k8s_openapi::NamespaceResourceScope;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// A namespaced resource kind that the controller reads or writes.
pub(crate) trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

#[async_trait::async_trait]
pub(crate) trait Store: Clone + Send + Sync + 'static {
    /// Reads an object. Absence is not an error.
    async fn get<K: Object>(&self, ns: &str, name: &str) -> Result<Option<K>, kube::Error>;

    async fn create<K: Object>(&self, ns: &str, obj: &K, manager: &str) -> Result<K, kube::Error>;

    /// Replaces an object wholesale, guarded by its resource version.
    async fn replace<K: Object>(&self, ns: &str, obj: &K, manager: &str)
        -> Result<K, kube::Error>;

    /// Server-side applies an object, taking ownership of conflicting fields.
    async fn apply<K: Object>(&self, ns: &str, obj: &K, manager: &str) -> Result<K, kube::Error>;

    async fn patch_status<K: Object>(
        &self,
        ns: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
        manager: &str,
    ) -> Result<(), kube::Error>;
}

#[derive(Clone)]
pub(crate) struct KubeStore {
    client: k8s::Client,
}

// === impl KubeStore ===

impl KubeStore {
    pub(crate) fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn post_params(manager: &str) -> PostParams {
    PostParams {
        field_manager: Some(manager.to_string()),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, ns: &str, name: &str) -> Result<Option<K>, kube::Error> {
        self.api::<K>(ns).get_opt(name).await
    }

    async fn create<K: Object>(&self, ns: &str, obj: &K, manager: &str) -> Result<K, kube::Error> {
        self.api::<K>(ns).create(&post_params(manager), obj).await
    }

    async fn replace<K: Object>(
        &self,
        ns: &str,
        obj: &K,
        manager: &str,
    ) -> Result<K, kube::Error> {
        self.api::<K>(ns)
            .replace(&obj.name_any(), &post_params(manager), obj)
            .await
    }

    async fn apply<K: Object>(&self, ns: &str, obj: &K, manager: &str) -> Result<K, kube::Error> {
        let params = PatchParams::apply(manager).force();
        self.api::<K>(ns)
            .patch(&obj.name_any(), &params, &Patch::Apply(obj))
            .await
    }

    async fn patch_status<K: Object>(
        &self,
        ns: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
        manager: &str,
    ) -> Result<(), kube::Error> {
        let params = PatchParams {
            field_manager: Some(manager.to_string()),
            ..Default::default()
        };
        self.api::<K>(ns).patch_status(name, &params, patch).await?;
        Ok(())
    }
}
