//! Finalizer handling for EvrocCluster and EvrocMachine cleanup
//!
//! The finalizer is added on the first pass and only removed once every
//! evroc resource owned by the object has been deleted (or was already
//! gone). Changes are made in memory and persisted by the pass's patch.

use kube::{Resource, ResourceExt};

/// Finalizer protecting EvrocCluster resources
pub const CLUSTER_FINALIZER: &str = "evroccluster.infrastructure.evroc.com";

/// Finalizer protecting EvrocMachine resources
pub const MACHINE_FINALIZER: &str = "evrocmachine.infrastructure.evroc.com";

/// Check if the object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add the finalizer if absent. Returns true if the object changed.
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Remove the finalizer so deletion can complete
pub fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    obj.finalizers_mut().retain(|f| f != finalizer);
}

/// A deletion timestamp means deletion was requested and finalizers are holding it
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
