//! Controllers for EvrocCluster and EvrocMachine reconciliation
//!
//! This module contains the reconcile passes for both kinds, the helpers
//! they share (conditions, finalizers, owner lookups, deferred patching)
//! and the kube-runtime wiring that drives them.

mod cluster;
pub mod conditions;
#[cfg(test)]
mod fake;
pub mod finalizers;
mod machine;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod owner;
pub mod patch;
mod reconciler;
#[cfg(test)]
mod scenario_test;
pub mod store;

use std::time::Duration;

use kube::runtime::controller::Action;

pub use cluster::reconcile_evroc_cluster;
pub use finalizers::{CLUSTER_FINALIZER, MACHINE_FINALIZER};
pub use machine::reconcile_evroc_machine;
pub use reconciler::{run_controllers, ControllerState};
pub use store::{KubeStore, ObjectStore};

/// Result of a successful reconcile pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the object changes
    Done,
    /// Poll again after the given delay
    RequeueAfter(Duration),
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Dependencies shared by every reconcile pass
pub struct Context<S, C> {
    pub store: S,
    pub connector: C,
}

impl<S, C> Context<S, C> {
    pub fn new(store: S, connector: C) -> Self {
        Self { store, connector }
    }
}
