//! EvrocMachine reconciliation
//!
//! Gated on the cluster's infrastructure and the machine's bootstrap data,
//! then drives boot disk, PublicIP and VM provisioning until the VM runs.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::conditions::{self, CONDITION_TYPE_READY};
use super::finalizers::{self, MACHINE_FINALIZER};
use super::owner::{get_cluster_from_metadata, get_owner_machine, is_paused};
use super::patch::PatchScope;
use super::store::ObjectStore;
use super::{Context, Outcome};
use crate::cloud::errors::{classify, handle_result, ErrorClass, BOOTSTRAP_DATA_RETRY_DELAY};
use crate::cloud::{CloudApi, CloudConnector, MachineState, Service};
use crate::crd::capi::CONTROL_PLANE_INITIALIZED_CONDITION;
use crate::crd::{
    Cluster, ConditionSeverity, EvrocCluster, EvrocMachine, EvrocMachineStatus, Machine,
    BOOTSTRAP_DATA_READY_CONDITION, VM_READY_CONDITION,
};
use crate::error::{Error, Result, ResultExt};

/// Key of the bootstrap secret holding the cloud-init payload
const BOOTSTRAP_DATA_KEY: &str = "value";

/// Everything a machine pass needs besides the EvrocMachine itself
struct Owners {
    machine: Machine,
    cluster: Cluster,
    evroc_cluster: EvrocCluster,
}

/// Reconcile one EvrocMachine
///
/// Returns early without error while the owner chain (Machine, Cluster,
/// EvrocCluster) is incomplete; those objects becoming available will
/// trigger another pass.
#[instrument(skip(ctx), fields(kind = "EvrocMachine"))]
pub async fn reconcile_evroc_machine<S, C>(
    ctx: &Context<S, C>,
    namespace: &str,
    name: &str,
) -> Result<Outcome>
where
    S: ObjectStore,
    C: CloudConnector,
{
    let Some(evroc_machine) = ctx
        .store
        .get::<EvrocMachine>(namespace, name)
        .await
        .context("failed to get EvrocMachine")?
    else {
        debug!("EvrocMachine no longer exists");
        return Ok(Outcome::Done);
    };

    let Some(owners) = resolve_owners(&ctx.store, &evroc_machine).await? else {
        return Ok(Outcome::Done);
    };

    if is_paused(&owners.cluster, &evroc_machine.metadata) {
        info!("EvrocMachine or linked Cluster is marked as paused, won't reconcile");
        return Ok(Outcome::Done);
    }

    let mut scope = PatchScope::open(evroc_machine);
    let result = reconcile_scoped(ctx, &mut scope.object, &owners).await;
    scope.commit(&ctx.store, result).await
}

async fn resolve_owners<S: ObjectStore>(
    store: &S,
    evroc_machine: &EvrocMachine,
) -> Result<Option<Owners>> {
    let Some(machine) = get_owner_machine(store, &evroc_machine.metadata).await? else {
        info!("Machine controller has not yet set the owner reference");
        return Ok(None);
    };

    let Some(cluster) = get_cluster_from_metadata(store, &machine.metadata).await? else {
        info!("Machine is missing the cluster label or the Cluster does not exist");
        return Ok(None);
    };

    let Some(infra_name) = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .map(|r| r.name.clone())
        .filter(|n| !n.is_empty())
    else {
        info!("Cluster has no infrastructure reference yet");
        return Ok(None);
    };

    let namespace = evroc_machine.namespace().unwrap_or_default();
    let Some(evroc_cluster) = store
        .get::<EvrocCluster>(&namespace, &infra_name)
        .await
        .with_context(|| format!("failed to get EvrocCluster {}/{}", namespace, infra_name))?
    else {
        info!("EvrocCluster {} is not available yet", infra_name);
        return Ok(None);
    };

    Ok(Some(Owners {
        machine,
        cluster,
        evroc_cluster,
    }))
}

async fn reconcile_scoped<S, C>(
    ctx: &Context<S, C>,
    evroc_machine: &mut EvrocMachine,
    owners: &Owners,
) -> Result<Outcome>
where
    S: ObjectStore,
    C: CloudConnector,
{
    let deleting = finalizers::is_being_deleted(evroc_machine);
    if deleting {
        if !finalizers::has_finalizer(evroc_machine, MACHINE_FINALIZER) {
            return Ok(Outcome::Done);
        }
    } else if finalizers::add_finalizer(evroc_machine, MACHINE_FINALIZER) {
        info!("Added finalizer to EvrocMachine {}", evroc_machine.name_any());
        return Ok(Outcome::Done);
    }

    let evroc_cluster = &owners.evroc_cluster;
    let api = match ctx.connector.connect(evroc_cluster).await {
        Ok(api) => api,
        Err(e) if e.is_not_found() => {
            info!(
                "Identity secret {} not found, waiting",
                evroc_cluster.spec.identity_secret_name
            );
            return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
        }
        Err(e) => return Err(e.context("failed to create evroc client")),
    };
    let service = Service::new(api, evroc_cluster.spec.project.clone());

    if deleting {
        reconcile_delete(&service, evroc_machine).await
    } else {
        reconcile_normal(&ctx.store, &service, evroc_machine, owners).await
    }
}

async fn reconcile_normal<S: ObjectStore, A: CloudApi>(
    store: &S,
    service: &Service<A>,
    evroc_machine: &mut EvrocMachine,
    owners: &Owners,
) -> Result<Outcome> {
    info!("Reconciling EvrocMachine");
    let Owners {
        machine,
        cluster,
        evroc_cluster,
    } = owners;

    if !cluster.infrastructure_ready() {
        info!("Waiting for cluster infrastructure to be ready");
        conditions::mark_false(
            &mut evroc_machine.status_mut().conditions,
            CONDITION_TYPE_READY,
            "WaitingForClusterInfrastructure",
            ConditionSeverity::Info,
            "Waiting for cluster infrastructure to be ready",
        );
        return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
    }

    let Some(secret_name) = machine.bootstrap_data_secret_name() else {
        let conds = &mut evroc_machine.status_mut().conditions;
        if !machine.is_control_plane()
            && !conditions::is_true(cluster.conditions(), CONTROL_PLANE_INITIALIZED_CONDITION)
        {
            info!("Waiting for the control plane to be initialized");
            conditions::mark_false(
                conds,
                CONDITION_TYPE_READY,
                "WaitingForControlPlane",
                ConditionSeverity::Info,
                "Waiting for control plane to be initialized",
            );
        } else {
            info!("Waiting for the bootstrap provider to set bootstrap data");
            conditions::mark_false(
                conds,
                BOOTSTRAP_DATA_READY_CONDITION,
                "WaitingForBootstrapData",
                ConditionSeverity::Info,
                "Waiting for bootstrap data secret to be set",
            );
        }
        return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
    };

    let namespace = machine.namespace().unwrap_or_default();
    let bootstrap_data = match get_bootstrap_data(store, &namespace, secret_name).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            info!("Bootstrap data secret {} not found yet, waiting", secret_name);
            conditions::mark_false(
                &mut evroc_machine.status_mut().conditions,
                BOOTSTRAP_DATA_READY_CONDITION,
                "BootstrapDataSecretNotFound",
                ConditionSeverity::Info,
                "Bootstrap data secret not found yet",
            );
            return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
        }
        Err(e) => {
            let conds = &mut evroc_machine.status_mut().conditions;
            conditions::mark_false(
                conds,
                BOOTSTRAP_DATA_READY_CONDITION,
                "BootstrapDataUnavailable",
                ConditionSeverity::Error,
                &format!("Failed to get bootstrap data: {}", e),
            );
            conditions::mark_false(
                conds,
                CONDITION_TYPE_READY,
                "BootstrapDataNotReady",
                ConditionSeverity::Error,
                "Bootstrap data is not available",
            );
            return Err(e);
        }
    };
    conditions::mark_true(
        &mut evroc_machine.status_mut().conditions,
        BOOTSTRAP_DATA_READY_CONDITION,
    );

    let state = match service
        .reconcile_machine(evroc_cluster, evroc_machine, machine, &bootstrap_data)
        .await
    {
        Ok(state) => state,
        Err(e) => {
            let status = evroc_machine.status_mut();
            conditions::mark_false(
                &mut status.conditions,
                VM_READY_CONDITION,
                "VMReconciliationFailed",
                ConditionSeverity::Error,
                &format!("Failed to reconcile machine: {}", e),
            );
            conditions::mark_false(
                &mut status.conditions,
                CONDITION_TYPE_READY,
                "VMNotReady",
                ConditionSeverity::Error,
                "Machine reconciliation failed",
            );
            record_failure(status, &e);
            return handle_result(Err(e), "failed to reconcile machine");
        }
    };

    let status = evroc_machine.status_mut();
    if let MachineState::Pending(vm_state) = state {
        let message = format!("VM is in state {:?}, waiting for Running", vm_state);
        conditions::mark_false(
            &mut status.conditions,
            VM_READY_CONDITION,
            "WaitingForVMRunning",
            ConditionSeverity::Info,
            &message,
        );
        conditions::mark_false(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            "WaitingForVMRunning",
            ConditionSeverity::Info,
            &message,
        );
        status.ready = false;
        return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
    }

    conditions::mark_true(&mut status.conditions, VM_READY_CONDITION);
    conditions::mark_true(&mut status.conditions, CONDITION_TYPE_READY);
    status.ready = true;
    status.failure_reason = None;
    status.failure_message = None;

    info!("Successfully reconciled EvrocMachine");
    Ok(Outcome::Done)
}

async fn reconcile_delete<A: CloudApi>(
    service: &Service<A>,
    evroc_machine: &mut EvrocMachine,
) -> Result<Outcome> {
    info!("Deleting EvrocMachine");

    service
        .delete_machine(evroc_machine)
        .await
        .context("failed to delete machine")?;

    finalizers::remove_finalizer(evroc_machine, MACHINE_FINALIZER);
    info!("Successfully deleted EvrocMachine");
    Ok(Outcome::Done)
}

/// Bootstrap payload from the Machine's data secret; `None` if the secret is missing
async fn get_bootstrap_data<S: ObjectStore>(
    store: &S,
    namespace: &str,
    secret_name: &str,
) -> Result<Option<Vec<u8>>> {
    let Some(secret) = store
        .get::<Secret>(namespace, secret_name)
        .await
        .context("failed to get bootstrap data secret")?
    else {
        return Ok(None);
    };

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(BOOTSTRAP_DATA_KEY))
        .map(|value| Some(value.0.clone()))
        .ok_or_else(|| Error::MissingSecretKey {
            secret: secret_name.to_string(),
            key: BOOTSTRAP_DATA_KEY.to_string(),
        })
}

/// Surface terminal provisioning errors to Cluster API
fn record_failure(status: &mut EvrocMachineStatus, err: &Error) {
    if classify(err) == ErrorClass::Terminal && !err.is_conflict() {
        status.failure_reason = Some("CreateError".to_string());
        status.failure_message = Some(err.to_string());
    }
}
