//! Owner chain lookups: EvrocMachine -> Machine -> Cluster, EvrocCluster -> Cluster

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::store::ObjectStore;
use crate::crd::capi::{CLUSTER_NAME_LABEL, PAUSED_ANNOTATION};
use crate::crd::{Cluster, Machine};
use crate::error::{Result, ResultExt};

const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Name of the Cluster API owner of the given kind, if one is referenced
pub fn owner_reference_name(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.kind == kind && api_group(&r.api_version) == CLUSTER_API_GROUP)
        .map(|r| r.name.clone())
}

fn api_group(api_version: &str) -> &str {
    api_version
        .split_once('/')
        .map(|(group, _)| group)
        .unwrap_or_default()
}

/// The Cluster that owns an object, or `None` if no owner reference is set yet
pub async fn get_owner_cluster<S: ObjectStore>(
    store: &S,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>> {
    let Some(name) = owner_reference_name(meta, "Cluster") else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    store
        .get::<Cluster>(namespace, &name)
        .await
        .with_context(|| format!("failed to get owner Cluster {}/{}", namespace, name))
}

/// The Machine that owns an object, or `None` if no owner reference is set yet
pub async fn get_owner_machine<S: ObjectStore>(
    store: &S,
    meta: &ObjectMeta,
) -> Result<Option<Machine>> {
    let Some(name) = owner_reference_name(meta, "Machine") else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    store
        .get::<Machine>(namespace, &name)
        .await
        .with_context(|| format!("failed to get owner Machine {}/{}", namespace, name))
}

/// The Cluster named by the object's `cluster.x-k8s.io/cluster-name` label
pub async fn get_cluster_from_metadata<S: ObjectStore>(
    store: &S,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>> {
    let Some(name) = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
        .filter(|name| !name.is_empty())
    else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    store
        .get::<Cluster>(namespace, name)
        .await
        .with_context(|| format!("failed to get Cluster {}/{}", namespace, name))
}

/// Whether reconciliation is paused on the Cluster or on the object itself
pub fn is_paused(cluster: &Cluster, meta: &ObjectMeta) -> bool {
    cluster.spec.paused
        || meta
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}
