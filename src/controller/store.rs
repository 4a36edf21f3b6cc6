//! Access to the management cluster's objects
//!
//! The reconcilers only need reads and merge patches, so they go through
//! [`ObjectStore`] rather than a raw client. That keeps the reconcile logic
//! runnable against an in-memory store in tests.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{Map, Value};

use crate::cloud::NamespacedResource;
use crate::error::Result;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Apply a JSON merge patch to the object's main resource
    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K>;

    /// Apply a JSON merge patch to the object's status sub-resource
    async fn patch_status<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K>;
}

/// [`ObjectStore`] backed by the management cluster's API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }
}

/// Compute the RFC 7386 merge patch that turns `original` into `modified`
///
/// Returns `None` when the two are equal. Arrays are replaced wholesale.
pub fn merge_patch_diff(original: &Value, modified: &Value) -> Option<Value> {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for (key, new) in modified {
                match original.get(key) {
                    Some(old) => {
                        if let Some(diff) = merge_patch_diff(old, new) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new.clone());
                    }
                }
            }
            for key in original.keys() {
                if !modified.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (original, modified) if original == modified => None,
        (_, modified) => Some(modified.clone()),
    }
}
