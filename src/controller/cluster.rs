//! EvrocCluster reconciliation
//!
//! Drives an EvrocCluster through network provisioning and publishes the
//! pre-allocated control plane address as the owning Cluster's endpoint.

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::conditions::{self, CONDITION_TYPE_READY};
use super::finalizers::{self, CLUSTER_FINALIZER};
use super::owner::{get_owner_cluster, is_paused};
use super::patch::PatchScope;
use super::store::ObjectStore;
use super::{Context, Outcome};
use crate::cloud::errors::{classify, handle_result, ErrorClass, BOOTSTRAP_DATA_RETRY_DELAY};
use crate::cloud::{CloudApi, CloudConnector, Service};
use crate::crd::{
    ApiEndpoint, Cluster, ConditionSeverity, EvrocCluster, EvrocClusterStatus,
    NETWORK_READY_CONDITION,
};
use crate::error::{Error, Result, ResultExt};

/// Port the workload cluster's API server listens on
pub const CONTROL_PLANE_PORT: i32 = 6443;

/// Reconcile one EvrocCluster
///
/// Fetches the object fresh, resolves its owning Cluster and runs a single
/// pass whose changes are patched back however the pass ends.
#[instrument(skip(ctx), fields(kind = "EvrocCluster"))]
pub async fn reconcile_evroc_cluster<S, C>(
    ctx: &Context<S, C>,
    namespace: &str,
    name: &str,
) -> Result<Outcome>
where
    S: ObjectStore,
    C: CloudConnector,
{
    let Some(evroc_cluster) = ctx
        .store
        .get::<EvrocCluster>(namespace, name)
        .await
        .context("failed to get EvrocCluster")?
    else {
        debug!("EvrocCluster no longer exists");
        return Ok(Outcome::Done);
    };

    // The owner reference may not be set yet; infrastructure can still be built
    let cluster = get_owner_cluster(&ctx.store, &evroc_cluster.metadata).await?;

    if let Some(cluster) = &cluster {
        if is_paused(cluster, &evroc_cluster.metadata) {
            info!("EvrocCluster or linked Cluster is marked as paused, won't reconcile");
            return Ok(Outcome::Done);
        }
    }

    let mut scope = PatchScope::open(evroc_cluster);
    let result = reconcile_scoped(ctx, &mut scope.object, cluster).await;
    scope.commit(&ctx.store, result).await
}

async fn reconcile_scoped<S, C>(
    ctx: &Context<S, C>,
    evroc_cluster: &mut EvrocCluster,
    cluster: Option<Cluster>,
) -> Result<Outcome>
where
    S: ObjectStore,
    C: CloudConnector,
{
    let deleting = finalizers::is_being_deleted(evroc_cluster);
    if deleting {
        if !finalizers::has_finalizer(evroc_cluster, CLUSTER_FINALIZER) {
            return Ok(Outcome::Done);
        }
    } else if finalizers::add_finalizer(evroc_cluster, CLUSTER_FINALIZER) {
        // The patch for the finalizer triggers the next pass
        info!("Added finalizer to EvrocCluster {}", evroc_cluster.name_any());
        return Ok(Outcome::Done);
    }

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
        reconcile_delete(&service, evroc_cluster).await
    } else {
        reconcile_normal(&ctx.store, &service, evroc_cluster, cluster).await
    }
}

async fn reconcile_normal<S: ObjectStore, A: CloudApi>(
    store: &S,
    service: &Service<A>,
    evroc_cluster: &mut EvrocCluster,
    cluster: Option<Cluster>,
) -> Result<Outcome> {
    info!("Reconciling EvrocCluster");

    if let Err(e) = service.reconcile_network(evroc_cluster).await {
        let status = evroc_cluster.status_mut();
        conditions::mark_false(
            &mut status.conditions,
            NETWORK_READY_CONDITION,
            "NetworkReconciliationFailed",
            ConditionSeverity::Error,
            &format!("Failed to reconcile network: {}", e),
        );
        conditions::mark_false(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            "NetworkNotReady",
            ConditionSeverity::Error,
            "Network reconciliation failed",
        );
        record_failure(status, &e);
        return handle_result(Err(e), "failed to reconcile network");
    }
    conditions::mark_true(
        &mut evroc_cluster.status_mut().conditions,
        NETWORK_READY_CONDITION,
    );

    let (public_ip_name, address) =
        match service.reconcile_control_plane_public_ip(evroc_cluster).await {
            Ok(ip) => ip,
            Err(e) => {
                record_failure(evroc_cluster.status_mut(), &e);
                return handle_result(Err(e), "failed to reconcile control plane PublicIP");
            }
        };

    let status = evroc_cluster.status_mut();
    status.control_plane_public_ip_name = public_ip_name;
    if address.is_empty() {
        conditions::mark_false(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            "WaitingForControlPlaneAddress",
            ConditionSeverity::Info,
            "Waiting for the control plane PublicIP to be allocated",
        );
        return Ok(Outcome::RequeueAfter(BOOTSTRAP_DATA_RETRY_DELAY));
    }

    match cluster {
        Some(cluster) => {
            let result = reconcile_control_plane_endpoint(store, cluster, &address).await;
            if result.is_err() {
                return handle_result(result, "failed to reconcile control plane endpoint");
            }
        }
        None => info!("Cluster owner reference not set yet, skipping control plane endpoint"),
    }

    let status = evroc_cluster.status_mut();
    conditions::mark_true(&mut status.conditions, CONDITION_TYPE_READY);
    status.ready = true;
    status.failure_reason = None;
    status.failure_message = None;

    info!("Successfully reconciled EvrocCluster");
    Ok(Outcome::Done)
}

/// Point the Cluster's control plane endpoint at the pre-allocated address
async fn reconcile_control_plane_endpoint<S: ObjectStore>(
    store: &S,
    cluster: Cluster,
    address: &str,
) -> Result<()> {
    let endpoint = ApiEndpoint::new(address, CONTROL_PLANE_PORT);
    if cluster.spec.control_plane_endpoint == endpoint {
        debug!("ControlPlaneEndpoint already set to {}:{}", address, CONTROL_PLANE_PORT);
        return Ok(());
    }

    info!(
        "Setting ControlPlaneEndpoint to pre-allocated PublicIP {}:{}",
        address, CONTROL_PLANE_PORT
    );
    let mut scope = PatchScope::open(cluster);
    scope.object.spec.control_plane_endpoint = endpoint;
    scope.commit(store, Ok(())).await
}

async fn reconcile_delete<A: CloudApi>(
    service: &Service<A>,
    evroc_cluster: &mut EvrocCluster,
) -> Result<Outcome> {
    info!("Deleting EvrocCluster");

    service
        .delete_network(evroc_cluster)
        .await
        .context("failed to delete network")?;

    finalizers::remove_finalizer(evroc_cluster, CLUSTER_FINALIZER);
    info!("Successfully deleted EvrocCluster");
    Ok(Outcome::Done)
}

/// Surface terminal provisioning errors to Cluster API
fn record_failure(status: &mut EvrocClusterStatus, err: &Error) {
    if classify(err) == ErrorClass::Terminal && !err.is_conflict() {
        status.failure_reason = Some("CreateError".to_string());
        status.failure_message = Some(err.to_string());
    }
}
