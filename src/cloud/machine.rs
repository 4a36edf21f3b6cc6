//! Boot disk, PublicIP and VirtualMachine provisioning for a single machine

use base64::{engine::general_purpose::STANDARD, Engine as _};
use kube::ResourceExt;
use tracing::{info, instrument};

use super::types::{
    Disk, DiskImageInfo, DiskImageRef, DiskRef, DiskSize, DiskSpec, DiskStorageClassInfo,
    PublicIP, PublicIPSpec, SecurityGroupMembershipRef, SecurityGroupSettings, VirtualMachine,
    VirtualMachineSpec, VmAuthorizedKey, VmNetworkingSettings, VmOsSettings,
    VmPublicIpv4AddressSettings, VmSshSettings, VmStaticPublicIpv4AddressSettings,
    VmVirtualResourcesRef, DISK_SIZE_UNIT,
};
use super::{object_meta, CloudApi, Service};
use crate::controller::conditions;
use crate::crd::{
    ConditionSeverity, EvrocCluster, EvrocMachine, Machine, MachineAddress, DISK_READY_CONDITION,
    PUBLIC_IP_READY_CONDITION,
};
use crate::error::{Result, ResultExt};

/// Where a machine's VM stands after a provisioning pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineState {
    /// VM is running and the machine's addresses and provider ID are recorded
    Running,
    /// VM exists but has not reached `Running`; carries the reported state
    Pending(String),
}

/// Provider ID recorded on the EvrocMachine and the workload Node
pub fn provider_id(project: &str, vm_name: &str) -> String {
    format!("evroc://{}/{}", project, vm_name)
}

pub fn boot_disk_name(machine_name: &str) -> String {
    format!("{}-bootdisk", machine_name)
}

pub fn public_ip_name(machine_name: &str) -> String {
    format!("{}-publicip", machine_name)
}

impl<A: CloudApi> Service<A> {
    /// Ensure the PublicIP (if requested), boot disk and VM of a machine exist
    ///
    /// Once the VM reports `Running`, the provider ID, addresses and instance
    /// state are written to `evroc_machine`.
    #[instrument(skip_all, fields(name = %evroc_machine.name_any(), project = %self.project))]
    pub async fn reconcile_machine(
        &self,
        evroc_cluster: &EvrocCluster,
        evroc_machine: &mut EvrocMachine,
        machine: &Machine,
        bootstrap_data: &[u8],
    ) -> Result<MachineState> {
        info!("Reconciling machine");
        let vm_name = evroc_machine.name_any();

        let existing_vm = self
            .api
            .get::<VirtualMachine>(&vm_name)
            .await
            .with_context(|| format!("failed to get VirtualMachine {}", vm_name))?;

        let public_ip_ref = if evroc_machine.spec.public_ip {
            let name = match existing_vm.as_ref().and_then(|vm| vm.public_ip_ref()) {
                Some(attached) => attached.to_string(),
                None => self.select_public_ip(evroc_cluster, &vm_name, machine).await?,
            };
            if let Err(e) = self.ensure_machine_public_ip(evroc_cluster, &name).await {
                conditions::mark_false(
                    &mut evroc_machine.status_mut().conditions,
                    PUBLIC_IP_READY_CONDITION,
                    "PublicIPProvisioningFailed",
                    ConditionSeverity::Error,
                    &e.to_string(),
                );
                return Err(e);
            }
            conditions::mark_true(
                &mut evroc_machine.status_mut().conditions,
                PUBLIC_IP_READY_CONDITION,
            );
            Some(name)
        } else {
            None
        };

        let boot_disk = &evroc_machine.spec.boot_disk;
        let disk = Disk {
            metadata: object_meta(&boot_disk_name(&vm_name), &self.project),
            spec: DiskSpec {
                disk_size: Some(DiskSize {
                    amount: boot_disk.size_gb,
                    unit: DISK_SIZE_UNIT.to_string(),
                }),
                disk_image: DiskImageInfo {
                    disk_image_ref: DiskImageRef {
                        name: boot_disk.image_name.clone(),
                    },
                },
                disk_storage_class: DiskStorageClassInfo {
                    name: boot_disk.storage_class.clone(),
                },
            },
        };
        let disk = match self.ensure(disk).await {
            Ok(disk) => disk,
            Err(e) => {
                conditions::mark_false(
                    &mut evroc_machine.status_mut().conditions,
                    DISK_READY_CONDITION,
                    "DiskProvisioningFailed",
                    ConditionSeverity::Error,
                    &e.to_string(),
                );
                return Err(e);
            }
        };
        conditions::mark_true(
            &mut evroc_machine.status_mut().conditions,
            DISK_READY_CONDITION,
        );

        let vm = match existing_vm {
            Some(vm) => vm,
            None => {
                let desired = self.desired_vm(
                    evroc_machine,
                    &disk.name_any(),
                    public_ip_ref,
                    bootstrap_data,
                );
                info!("VirtualMachine {} not found, creating it", vm_name);
                let created = self
                    .api
                    .create(&desired)
                    .await
                    .with_context(|| format!("failed to create VirtualMachine {}", vm_name))?;
                info!("VirtualMachine {} created", vm_name);
                created
            }
        };

        if !vm.is_running() {
            info!("VM is not yet in Running state: {:?}", vm.state());
            if !vm.state().is_empty() {
                evroc_machine.status_mut().instance_state = Some(vm.state().to_string());
            }
            return Ok(MachineState::Pending(vm.state().to_string()));
        }

        let provider_id = provider_id(&self.project, &vm_name);
        evroc_machine.spec.provider_id = Some(provider_id.clone());

        let networking = vm
            .status
            .as_ref()
            .map(|s| s.networking.clone())
            .unwrap_or_default();
        let status = evroc_machine.status_mut();
        status.provider_id = Some(provider_id);
        status.instance_state = Some(vm.state().to_string());
        status.addresses = vec![
            MachineAddress::internal_ip(networking.private_ipv4_address),
            MachineAddress::external_ip(networking.public_ipv4_address),
        ];

        Ok(MachineState::Running)
    }

    /// Delete the VM, then its boot disk, then its own PublicIP
    ///
    /// The control plane PublicIP belongs to the cluster and is left alone.
    #[instrument(skip_all, fields(name = %evroc_machine.name_any(), project = %self.project))]
    pub async fn delete_machine(&self, evroc_machine: &EvrocMachine) -> Result<()> {
        info!("Deleting machine");
        let vm_name = evroc_machine.name_any();

        self.delete_if_present::<VirtualMachine>(&vm_name).await?;
        self.delete_if_present::<Disk>(&boot_disk_name(&vm_name)).await?;
        if evroc_machine.spec.public_ip {
            self.delete_if_present::<PublicIP>(&public_ip_name(&vm_name))
                .await?;
        }
        Ok(())
    }

    /// Pick the PublicIP a new VM should attach to
    ///
    /// Control plane machines take over the cluster's pre-allocated address
    /// unless another VM already holds it; every other machine gets its own.
    async fn select_public_ip(
        &self,
        evroc_cluster: &EvrocCluster,
        vm_name: &str,
        machine: &Machine,
    ) -> Result<String> {
        let control_plane_ip = evroc_cluster
            .status
            .as_ref()
            .map(|s| s.control_plane_public_ip_name.as_str())
            .unwrap_or_default();

        if !machine.is_control_plane() || control_plane_ip.is_empty() {
            return Ok(public_ip_name(vm_name));
        }

        let holder = self
            .api
            .list::<VirtualMachine>()
            .await
            .context("failed to list VirtualMachines")?
            .into_iter()
            .find(|vm| vm.name_any() != vm_name && vm.public_ip_ref() == Some(control_plane_ip));

        match holder {
            Some(vm) => {
                info!(
                    "Control plane PublicIP {} is attached to {}, allocating a dedicated one",
                    control_plane_ip,
                    vm.name_any()
                );
                Ok(public_ip_name(vm_name))
            }
            None => {
                info!("Using pre-allocated control plane PublicIP {}", control_plane_ip);
                Ok(control_plane_ip.to_string())
            }
        }
    }

    /// The control plane PublicIP is owned by the cluster; only a machine's
    /// own address is created here.
    async fn ensure_machine_public_ip(
        &self,
        evroc_cluster: &EvrocCluster,
        name: &str,
    ) -> Result<()> {
        if name == evroc_cluster.control_plane_public_ip_name() {
            return Ok(());
        }
        self.ensure(PublicIP {
            metadata: object_meta(name, &self.project),
            spec: PublicIPSpec {},
            status: None,
        })
        .await?;
        Ok(())
    }

    fn desired_vm(
        &self,
        evroc_machine: &EvrocMachine,
        disk_name: &str,
        public_ip_ref: Option<String>,
        bootstrap_data: &[u8],
    ) -> VirtualMachine {
        let spec = &evroc_machine.spec;

        let ssh = (!spec.ssh_key.is_empty()).then(|| VmSshSettings {
            authorized_keys: vec![VmAuthorizedKey {
                value: spec.ssh_key.clone(),
            }],
        });

        let security_groups = (!spec.security_groups.is_empty()).then(|| SecurityGroupSettings {
            security_group_memberships: spec
                .security_groups
                .iter()
                .map(|name| SecurityGroupMembershipRef { name: name.clone() })
                .collect(),
        });

        VirtualMachine {
            metadata: object_meta(&evroc_machine.name_any(), &self.project),
            spec: VirtualMachineSpec {
                running: true,
                vm_virtual_resources_ref: VmVirtualResourcesRef {
                    vm_virtual_resources_ref_name: spec.virtual_resources_ref.clone(),
                },
                disk_refs: vec![DiskRef {
                    name: disk_name.to_string(),
                    boot_from: true,
                }],
                os_settings: Some(VmOsSettings {
                    cloud_init_user_data: STANDARD.encode(bootstrap_data),
                    ssh,
                }),
                networking: Some(VmNetworkingSettings {
                    public_ipv4_address: public_ip_ref.map(|public_ip_ref| {
                        VmPublicIpv4AddressSettings {
                            static_: Some(VmStaticPublicIpv4AddressSettings { public_ip_ref }),
                        }
                    }),
                    security_groups,
                }),
            },
            status: None,
        }
    }
}
