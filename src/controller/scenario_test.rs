//! End-to-end provisioning against the in-memory fakes
//!
//! Plays the part of the Cluster API core controllers between passes:
//! marks the cluster infrastructure ready once the EvrocCluster is, and
//! hands out bootstrap data.

#[cfg(test)]
mod tests {
    use kube::ResourceExt;
    use tokio_test::assert_ok;

    use super::super::fake::*;
    use super::super::store::ObjectStore;
    use super::super::{
        reconcile_evroc_cluster, reconcile_evroc_machine, Context, Outcome, CLUSTER_FINALIZER,
        MACHINE_FINALIZER,
    };
    use crate::cloud::types::{PublicIP, VirtualMachine};
    use crate::crd::{Cluster, EvrocCluster, EvrocMachine};

    const CLUSTER: &str = "demo";
    const CONTROL_PLANE: &str = "demo-cp-0";
    const WORKER: &str = "demo-md-0";
    const MAX_PASSES: usize = 5;

    type TestContext = Context<FakeStore, FakeConnector>;

    async fn converge_cluster(ctx: &TestContext) -> usize {
        for pass in 1..=MAX_PASSES {
            let outcome = assert_ok!(reconcile_evroc_cluster(ctx, NAMESPACE, CLUSTER).await);
            let ready = ctx
                .store
                .read::<EvrocCluster>(CLUSTER)
                .and_then(|c| c.status)
                .is_some_and(|s| s.ready);
            if outcome == Outcome::Done && ready {
                return pass;
            }
        }
        panic!("EvrocCluster did not become ready in {} passes", MAX_PASSES);
    }

    async fn converge_machine(ctx: &TestContext, name: &str) -> usize {
        for pass in 1..=MAX_PASSES {
            let outcome = assert_ok!(reconcile_evroc_machine(ctx, NAMESPACE, name).await);
            if outcome == Outcome::Done && ctx.store.read::<EvrocMachine>(name).unwrap().is_ready()
            {
                return pass;
            }
        }
        panic!("EvrocMachine {} did not become ready in {} passes", name, MAX_PASSES);
    }

    /// What the core Cluster API controller does once the infrastructure is ready
    async fn mark_infrastructure_ready(ctx: &TestContext) {
        let patch = serde_json::json!({ "status": { "infrastructureReady": true } });
        assert_ok!(
            ctx.store
                .patch_status::<Cluster>(NAMESPACE, CLUSTER, &patch)
                .await
        );
    }

    fn add_machine(ctx: &TestContext, name: &str, control_plane: bool) {
        let secret = format!("{}-bootstrap", name);
        ctx.store
            .insert(machine(name, CLUSTER, control_plane, Some(&secret)));
        ctx.store.insert(bootstrap_secret(&secret, "#cloud-config\n"));
        ctx.store.insert(evroc_machine(name, CLUSTER));
    }

    #[tokio::test]
    async fn test_cluster_and_machines_become_ready() {
        let cloud = FakeCloud::auto_provisioning();
        let ctx = Context::new(FakeStore::new(), FakeConnector::new(cloud.clone()));
        ctx.store.insert(cluster(CLUSTER, false));
        ctx.store.insert(evroc_cluster(CLUSTER));

        // Finalizer pass, then one provisioning pass
        assert_eq!(converge_cluster(&ctx).await, 2);
        let evroc_cluster = ctx.store.read::<EvrocCluster>(CLUSTER).unwrap();
        assert!(evroc_cluster.finalizers().contains(&CLUSTER_FINALIZER.to_string()));

        let cp_address = cloud
            .read::<PublicIP>("demo-cp-publicip")
            .unwrap()
            .address()
            .to_string();
        let cluster = ctx.store.read::<Cluster>(CLUSTER).unwrap();
        assert_eq!(cluster.spec.control_plane_endpoint.host, cp_address);
        assert_eq!(cluster.spec.control_plane_endpoint.port, 6443);

        mark_infrastructure_ready(&ctx).await;

        add_machine(&ctx, CONTROL_PLANE, true);
        assert_eq!(converge_machine(&ctx, CONTROL_PLANE).await, 2);

        let cp = ctx.store.read::<EvrocMachine>(CONTROL_PLANE).unwrap();
        assert!(cp.finalizers().contains(&MACHINE_FINALIZER.to_string()));
        let status = cp.status.unwrap();
        assert_eq!(status.addresses.len(), 2);
        assert!(!status.provider_id.unwrap_or_default().is_empty());
        let cp_vm = cloud.read::<VirtualMachine>(CONTROL_PLANE).unwrap();
        assert_eq!(cp_vm.public_ip_ref(), Some("demo-cp-publicip"));

        add_machine(&ctx, WORKER, false);
        assert_eq!(converge_machine(&ctx, WORKER).await, 2);
        let worker_vm = cloud.read::<VirtualMachine>(WORKER).unwrap();
        assert_eq!(worker_vm.public_ip_ref(), Some("demo-md-0-publicip"));

        assert_eq!(cloud.calls_matching("create VirtualPrivateCloud").len(), 1);
        assert_eq!(cloud.calls_matching("create Subnet").len(), 1);
        assert_eq!(
            cloud.calls_matching("create PublicIP"),
            vec![
                "create PublicIP demo-cp-publicip".to_string(),
                "create PublicIP demo-md-0-publicip".to_string(),
            ]
        );
        assert_eq!(cloud.calls_matching("create Disk").len(), 2);
        assert_eq!(cloud.calls_matching("create VirtualMachine").len(), 2);
    }

    #[tokio::test]
    async fn test_ready_objects_are_stable() {
        let cloud = FakeCloud::auto_provisioning();
        let ctx = Context::new(FakeStore::new(), FakeConnector::new(cloud.clone()));
        ctx.store.insert(cluster(CLUSTER, false));
        ctx.store.insert(evroc_cluster(CLUSTER));
        converge_cluster(&ctx).await;
        mark_infrastructure_ready(&ctx).await;
        add_machine(&ctx, CONTROL_PLANE, true);
        converge_machine(&ctx, CONTROL_PLANE).await;

        let creates = cloud.calls_matching("create").len();
        let patches = ctx.store.patch_count();

        // A restarted controller re-runs every object from scratch
        assert_eq!(
            assert_ok!(reconcile_evroc_cluster(&ctx, NAMESPACE, CLUSTER).await),
            Outcome::Done
        );
        assert_eq!(
            assert_ok!(reconcile_evroc_machine(&ctx, NAMESPACE, CONTROL_PLANE).await),
            Outcome::Done
        );

        assert_eq!(cloud.calls_matching("create").len(), creates);
        assert_eq!(ctx.store.patch_count(), patches);
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let cloud = FakeCloud::auto_provisioning();
        let ctx = Context::new(FakeStore::new(), FakeConnector::new(cloud.clone()));
        ctx.store.insert(cluster(CLUSTER, false));
        ctx.store.insert(evroc_cluster(CLUSTER));
        converge_cluster(&ctx).await;
        mark_infrastructure_ready(&ctx).await;
        add_machine(&ctx, WORKER, false);
        converge_machine(&ctx, WORKER).await;

        let machine = ctx.store.read::<EvrocMachine>(WORKER).unwrap();
        ctx.store.insert(deleted(machine, MACHINE_FINALIZER));
        assert_ok!(reconcile_evroc_machine(&ctx, NAMESPACE, WORKER).await);

        let evroc_cluster = ctx.store.read::<EvrocCluster>(CLUSTER).unwrap();
        ctx.store.insert(deleted(evroc_cluster, CLUSTER_FINALIZER));
        assert_ok!(reconcile_evroc_cluster(&ctx, NAMESPACE, CLUSTER).await);

        assert!(ctx.store.read::<EvrocMachine>(WORKER).is_none());
        assert!(ctx.store.read::<EvrocCluster>(CLUSTER).is_none());
        for kind in ["VirtualMachine", "Disk", "PublicIP", "Subnet", "VirtualPrivateCloud"] {
            assert!(
                !cloud.calls_matching(&format!("delete {}", kind)).is_empty(),
                "{} was not deleted",
                kind
            );
        }
        assert!(cloud.read::<PublicIP>("demo-cp-publicip").is_none());
    }
}
