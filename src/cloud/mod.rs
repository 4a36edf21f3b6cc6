//! Infrastructure service for the evroc cloud
//!
//! The evroc API exposes its resources as namespaced Kubernetes objects in a
//! per-project namespace, so provisioning is a matter of get-or-create by a
//! deterministic name. Existing resources are never mutated.

mod client;
pub mod errors;
mod machine;
mod network;
pub mod types;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::crd::EvrocCluster;
use crate::error::{Result, ResultExt};

pub use client::{identity_kubeconfig, project_kubeconfig, KubeCloudApi, KubeConnector};
pub use machine::MachineState;

/// A namespaced kind with a static type, readable and writable through serde
pub trait NamespacedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Raw access to one evroc project
///
/// `delete` surfaces not-found and forbidden errors; [`Service`] decides
/// which of them count as success.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn get<K: NamespacedResource>(&self, name: &str) -> Result<Option<K>>;

    async fn list<K: NamespacedResource>(&self) -> Result<Vec<K>>;

    async fn create<K: NamespacedResource>(&self, obj: &K) -> Result<K>;

    async fn delete<K: NamespacedResource>(&self, name: &str) -> Result<()>;
}

/// Builds a [`CloudApi`] from an EvrocCluster's identity secret
///
/// Created once at start-up and shared by both controllers.
#[async_trait]
pub trait CloudConnector: Send + Sync + 'static {
    type Api: CloudApi + 'static;

    async fn connect(&self, evroc_cluster: &EvrocCluster) -> Result<Self::Api>;
}

/// Idempotent provisioning against a single evroc project
pub struct Service<A> {
    api: A,
    project: String,
}

impl<A: CloudApi> Service<A> {
    pub fn new(api: A, project: impl Into<String>) -> Self {
        Self {
            api,
            project: project.into(),
        }
    }

    /// Return the named object, creating `desired` if it does not exist yet
    async fn ensure<K: NamespacedResource>(&self, desired: K) -> Result<K> {
        let name = desired.name_any();
        let kind = K::kind(&());

        if let Some(existing) = self
            .api
            .get::<K>(&name)
            .await
            .with_context(|| format!("failed to get {} {}", kind, name))?
        {
            return Ok(existing);
        }

        info!("{} {} not found, creating it", kind, name);
        let created = self
            .api
            .create(&desired)
            .await
            .with_context(|| format!("failed to create {} {}", kind, name))?;
        info!("{} {} created", kind, name);
        #[cfg(feature = "metrics")]
        crate::controller::metrics::inc_cloud_resource_created(&kind);
        Ok(created)
    }

    /// Delete the named object; gone or forbidden both count as done
    async fn delete_if_present<K: NamespacedResource>(&self, name: &str) -> Result<()> {
        let kind = K::kind(&());
        match self.api.delete::<K>(name).await {
            Ok(()) => {
                info!("Deleted {} {}", kind, name);
                #[cfg(feature = "metrics")]
                crate::controller::metrics::inc_cloud_resource_deleted(&kind);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) if e.is_forbidden() => {
                info!(
                    "Not allowed to delete {} {}, treating it as shared and skipping",
                    kind, name
                );
                Ok(())
            }
            Err(e) => Err(e.context(format!("failed to delete {} {}", kind, name))),
        }
    }
}

/// Object metadata for a provider resource in the project namespace
fn object_meta(name: &str, project: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(project.to_string()),
        ..Default::default()
    }
}
