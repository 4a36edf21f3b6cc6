//! VPC, subnet and control plane PublicIP provisioning

use kube::ResourceExt;
use tracing::{info, instrument};

use super::types::{
    Ipv4CidrBlock, PublicIP, PublicIPSpec, Subnet, SubnetSpec, VirtualPrivateCloud,
    VirtualPrivateCloudSpec, VpcRef,
};
use super::{object_meta, CloudApi, Service};
use crate::controller::conditions;
use crate::crd::{
    ConditionSeverity, EvrocCluster, EvrocSubnetStatus, EvrocVpcStatus, SUBNETS_READY_CONDITION,
    VPC_READY_CONDITION,
};
use crate::error::{Result, ResultExt};

impl<A: CloudApi> Service<A> {
    /// Ensure the VPC and every subnet in `spec.network.subnets` exist
    ///
    /// Records the VPC and one status entry per subnet, whether it was just
    /// created or already there.
    #[instrument(skip(self, evroc_cluster), fields(name = %evroc_cluster.name_any(), project = %self.project))]
    pub async fn reconcile_network(&self, evroc_cluster: &mut EvrocCluster) -> Result<()> {
        info!("Reconciling network");

        let vpc_name = evroc_cluster.vpc_name();
        let vpc = VirtualPrivateCloud {
            metadata: object_meta(&vpc_name, &self.project),
            spec: VirtualPrivateCloudSpec {},
        };
        if let Err(e) = self.ensure(vpc).await {
            conditions::mark_false(
                &mut evroc_cluster.status_mut().conditions,
                VPC_READY_CONDITION,
                "VPCProvisioningFailed",
                ConditionSeverity::Error,
                &e.to_string(),
            );
            return Err(e);
        }

        let status = evroc_cluster.status_mut();
        status.network.vpc = EvrocVpcStatus {
            name: vpc_name.clone(),
            ready: true,
        };
        conditions::mark_true(&mut status.conditions, VPC_READY_CONDITION);

        let mut subnet_statuses = Vec::with_capacity(evroc_cluster.spec.network.subnets.len());
        for subnet_spec in &evroc_cluster.spec.network.subnets {
            let subnet = Subnet {
                metadata: object_meta(&subnet_spec.name, &self.project),
                spec: SubnetSpec {
                    vpc_ref: VpcRef {
                        name: vpc_name.clone(),
                    },
                    ipv4_cidr_block: Ipv4CidrBlock {
                        block: subnet_spec.cidr_block.clone(),
                    },
                },
            };
            if let Err(e) = self.ensure(subnet).await {
                // Field borrow: the subnet specs are still borrowed here
                let status = evroc_cluster.status.get_or_insert_with(Default::default);
                conditions::mark_false(
                    &mut status.conditions,
                    SUBNETS_READY_CONDITION,
                    "SubnetProvisioningFailed",
                    ConditionSeverity::Error,
                    &e.to_string(),
                );
                return Err(e);
            }

            subnet_statuses.push(EvrocSubnetStatus {
                name: subnet_spec.name.clone(),
                id: subnet_spec.name.clone(),
                cidr_block: subnet_spec.cidr_block.clone(),
                ready: true,
            });
        }

        let status = evroc_cluster.status_mut();
        status.network.subnets = subnet_statuses;
        conditions::mark_true(&mut status.conditions, SUBNETS_READY_CONDITION);
        Ok(())
    }

    /// Ensure the control plane PublicIP exists
    ///
    /// Returns its name and address. The address is empty until evroc has
    /// allocated one, which the caller should treat as "retry later".
    #[instrument(skip(self, evroc_cluster), fields(name = %evroc_cluster.name_any(), project = %self.project))]
    pub async fn reconcile_control_plane_public_ip(
        &self,
        evroc_cluster: &EvrocCluster,
    ) -> Result<(String, String)> {
        let name = evroc_cluster.control_plane_public_ip_name();

        let public_ip = match self
            .api
            .get::<PublicIP>(&name)
            .await
            .with_context(|| format!("failed to get PublicIP {}", name))?
        {
            Some(ip) => ip,
            None => {
                info!("Control plane PublicIP {} not found, creating it", name);
                let desired = PublicIP {
                    metadata: object_meta(&name, &self.project),
                    spec: PublicIPSpec {},
                    status: None,
                };
                let created = self
                    .api
                    .create(&desired)
                    .await
                    .with_context(|| format!("failed to create PublicIP {}", name))?;

                // Allocation can be immediate, so look again before giving up on it
                self.api
                    .get::<PublicIP>(&name)
                    .await
                    .with_context(|| format!("failed to get PublicIP after creation {}", name))?
                    .unwrap_or(created)
            }
        };

        let address = public_ip.address().to_string();
        if address.is_empty() {
            info!("Control plane PublicIP {} not yet allocated, waiting", name);
        } else {
            info!("Control plane PublicIP {} ready at {}", name, address);
        }
        Ok((name, address))
    }

    /// Delete subnets, the control plane PublicIP and finally the VPC
    #[instrument(skip(self, evroc_cluster), fields(name = %evroc_cluster.name_any(), project = %self.project))]
    pub async fn delete_network(&self, evroc_cluster: &EvrocCluster) -> Result<()> {
        info!("Deleting network");

        for subnet in &evroc_cluster.spec.network.subnets {
            self.delete_if_present::<Subnet>(&subnet.name).await?;
        }

        // Deterministic name so cleanup works even if status was never written
        self.delete_if_present::<PublicIP>(&evroc_cluster.control_plane_public_ip_name())
            .await?;

        self.delete_if_present::<VirtualPrivateCloud>(&evroc_cluster.vpc_name())
            .await
    }
}
