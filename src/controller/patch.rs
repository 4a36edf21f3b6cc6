//! Deferred patching of a reconciled object
//!
//! A [`PatchScope`] snapshots an object when a pass starts. The pass mutates
//! `scope.object` freely and the scope is committed exactly once when the
//! pass returns, whatever the outcome. Only the fields that changed are
//! sent: finalizers and spec through the main resource, status through the
//! status sub-resource. Both carry the resourceVersion the pass started from,
//! so a concurrent writer makes the commit fail with a conflict.

use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use super::store::{merge_patch_diff, ObjectStore};
use crate::cloud::NamespacedResource;
use crate::error::{Result, ResultExt};

pub struct PatchScope<K> {
    original: K,
    pub object: K,
}

impl<K: NamespacedResource> PatchScope<K> {
    pub fn open(object: K) -> Self {
        Self {
            original: object.clone(),
            object,
        }
    }

    /// Persist the changes and fold any patch error into the pass result
    ///
    /// A failed pass keeps its own error; the patch error is only logged.
    pub async fn commit<S: ObjectStore, T>(self, store: &S, result: Result<T>) -> Result<T> {
        let name = self.object.name_any();
        let kind = K::kind(&());
        match (result, self.persist(store).await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.context(format!("failed to patch {} {}", kind, name))),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(patch_err)) => {
                error!("Failed to patch {} {}: {}", kind, name, patch_err);
                Err(e)
            }
        }
    }

    async fn persist<S: ObjectStore>(&self, store: &S) -> Result<()> {
        let original = serde_json::to_value(&self.original)?;
        let modified = serde_json::to_value(&self.object)?;
        let namespace = self.object.namespace().unwrap_or_default();
        let name = self.object.name_any();
        let mut resource_version = self.original.resource_version();

        let mut body = Map::new();
        if merge_patch_diff(
            &original["metadata"]["finalizers"],
            &modified["metadata"]["finalizers"],
        )
        .is_some()
        {
            body.insert(
                "metadata".to_string(),
                json!({ "finalizers": modified["metadata"]["finalizers"] }),
            );
        }
        if let Some(spec) = merge_patch_diff(&original["spec"], &modified["spec"]) {
            body.insert("spec".to_string(), spec);
        }

        if !body.is_empty() {
            let mut patch = Value::Object(body);
            patch["metadata"]["resourceVersion"] = json!(resource_version);
            debug!("Patching {}/{}: {}", namespace, name, patch);
            let updated: K = store
                .patch(&namespace, &name, &patch)
                .await
                .context("failed to patch object")?;
            resource_version = updated.resource_version();
        }

        if let Some(status) = merge_patch_diff(&original["status"], &modified["status"]) {
            let patch = json!({
                "metadata": { "resourceVersion": resource_version },
                "status": status,
            });
            debug!("Patching status of {}/{}: {}", namespace, name, patch);
            match store.patch_status::<K>(&namespace, &name, &patch).await {
                Ok(_) => {}
                // Removing the last finalizer may have let the object go
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.context("failed to patch status")),
            }
        }

        Ok(())
    }
}
