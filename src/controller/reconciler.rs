//! Controller runtime wiring for EvrocCluster and EvrocMachine
//!
//! Implements the controller pattern using kube-rs runtime. Each kind gets
//! its own `Controller`; both share one object store and one cloud connector.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{error, info, instrument};

use super::{reconcile_evroc_cluster, reconcile_evroc_machine, Context, KubeStore};
#[cfg(feature = "metrics")]
use crate::cloud::errors::classify;
use crate::cloud::KubeConnector;
use crate::crd::{Cluster, EvrocCluster, EvrocMachine, Machine};
use crate::error::{Error, Result};

/// Shared state for the controllers
pub struct ControllerState {
    pub context: Context<KubeStore, KubeConnector>,
}

impl ControllerState {
    pub fn new(client: Client) -> Self {
        Self {
            context: Context::new(KubeStore::new(client.clone()), KubeConnector::new(client)),
        }
    }
}

/// Run both controllers until a shutdown signal is received
///
/// Watches every namespace unless `namespace` is given.
pub async fn run_controllers(client: Client, namespace: Option<String>) -> Result<()> {
    let state = Arc::new(ControllerState::new(client.clone()));

    let evroc_clusters: Api<EvrocCluster> = scoped_api(&client, namespace.as_deref());
    let evroc_machines: Api<EvrocMachine> = scoped_api(&client, namespace.as_deref());
    let clusters: Api<Cluster> = scoped_api(&client, namespace.as_deref());
    let machines: Api<Machine> = scoped_api(&client, namespace.as_deref());

    // Verify CRDs exist
    for (kind, result) in [
        ("EvrocCluster", evroc_clusters.list(&Default::default()).await.map(|_| ())),
        ("EvrocMachine", evroc_machines.list(&Default::default()).await.map(|_| ())),
    ] {
        match result {
            Ok(()) => info!("{} CRD is available", kind),
            Err(e) => {
                error!("{} CRD not found. Please install the CRDs first: {:?}", kind, e);
                return Err(Error::ConfigError(format!("{} CRD not installed", kind)));
            }
        }
    }

    info!(
        "Starting EvrocCluster and EvrocMachine controllers (namespace: {})",
        namespace.as_deref().unwrap_or("all")
    );

    let cluster_controller = Controller::new(evroc_clusters, Config::default())
        // Endpoint and pause changes on the owning Cluster
        .watches(clusters, Config::default(), |cluster| {
            infrastructure_ref::<EvrocCluster>(
                cluster.namespace(),
                cluster.spec.infrastructure_ref.as_ref(),
            )
        })
        .shutdown_on_signal()
        .run(reconcile_cluster, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        });

    let machine_controller = Controller::new(evroc_machines, Config::default())
        // Bootstrap data and owner reference changes on the owning Machine
        .watches(machines, Config::default(), |machine| {
            infrastructure_ref::<EvrocMachine>(
                machine.namespace(),
                machine.spec.infrastructure_ref.as_ref(),
            )
        })
        .shutdown_on_signal()
        .run(reconcile_machine, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        });

    futures::join!(cluster_controller, machine_controller);
    info!("Controllers stopped");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Map a Cluster API infrastructure reference to the provider object it names
fn infrastructure_ref<K>(
    namespace: Option<String>,
    reference: Option<&crate::crd::ObjectReference>,
) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let reference = reference?;
    if reference.name.is_empty() || reference.kind.as_deref() != Some(K::kind(&()).as_ref()) {
        return None;
    }
    let namespace = reference.namespace.clone().or(namespace)?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_cluster(obj: Arc<EvrocCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let namespace = obj.namespace().unwrap_or_default();
    let result = reconcile_evroc_cluster(&ctx.context, &namespace, &obj.name_any()).await;

    #[cfg(feature = "metrics")]
    record_pass("evroccluster", started, &result);

    result.map(Action::from)
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_machine(obj: Arc<EvrocMachine>, ctx: Arc<ControllerState>) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let namespace = obj.namespace().unwrap_or_default();
    let result = reconcile_evroc_machine(&ctx.context, &namespace, &obj.name_any()).await;

    #[cfg(feature = "metrics")]
    record_pass("evrocmachine", started, &result);

    result.map(Action::from)
}

#[cfg(feature = "metrics")]
fn record_pass(controller: &str, started: std::time::Instant, result: &Result<super::Outcome>) {
    use super::metrics;

    metrics::observe_reconcile_duration_seconds(controller, started.elapsed().as_secs_f64());
    if let Ok(super::Outcome::RequeueAfter(_)) = result {
        metrics::inc_reconcile_requeue(controller);
    }
}

/// Error policy for both controllers
fn error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<ControllerState>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    error!("Reconciliation error for {} {}: {:?}", kind, obj.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(&kind.to_lowercase(), classify(error).as_str());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
