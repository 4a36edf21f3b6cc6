//! evroc provider API kinds
//!
//! The evroc API is itself Kubernetes-shaped: every resource lives in the
//! namespace named after the project and is reached through a kubeconfig
//! scoped to that project.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status string reported by a VirtualMachine that has booted
pub const VM_STATUS_RUNNING: &str = "Running";

/// Unit used for every boot disk size
pub const DISK_SIZE_UNIT: &str = "GB";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.evroc.com",
    version = "v1alpha1",
    kind = "VirtualPrivateCloud",
    namespaced
)]
pub struct VirtualPrivateCloudSpec {}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.evroc.com",
    version = "v1alpha1",
    kind = "Subnet",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub vpc_ref: VpcRef,
    pub ipv4_cidr_block: Ipv4CidrBlock,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VpcRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Ipv4CidrBlock {
    pub block: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.evroc.com",
    version = "v1alpha1",
    kind = "PublicIP",
    namespaced,
    status = "PublicIPStatus"
)]
pub struct PublicIPSpec {}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PublicIPStatus {
    /// Allocated asynchronously; empty until the address is assigned
    #[serde(
        default,
        rename = "publicIPv4Address",
        skip_serializing_if = "String::is_empty"
    )]
    pub public_ipv4_address: String,
}

impl PublicIP {
    pub fn address(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.public_ipv4_address.as_str())
            .unwrap_or_default()
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "compute.evroc.com",
    version = "v1alpha1",
    kind = "Disk",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<DiskSize>,
    pub disk_image: DiskImageInfo,
    pub disk_storage_class: DiskStorageClassInfo,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DiskSize {
    pub amount: i32,
    pub unit: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskImageInfo {
    pub disk_image_ref: DiskImageRef,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DiskImageRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DiskStorageClassInfo {
    pub name: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "compute.evroc.com",
    version = "v1alpha1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(default)]
    pub running: bool,
    pub vm_virtual_resources_ref: VmVirtualResourcesRef,
    pub disk_refs: Vec<DiskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_settings: Option<VmOsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<VmNetworkingSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmVirtualResourcesRef {
    pub vm_virtual_resources_ref_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskRef {
    pub name: String,
    pub boot_from: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmOsSettings {
    /// Base64-encoded cloud-init user data
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_init_user_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<VmSshSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmSshSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<VmAuthorizedKey>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VmAuthorizedKey {
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmNetworkingSettings {
    #[serde(
        default,
        rename = "publicIPv4Address",
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ipv4_address: Option<VmPublicIpv4AddressSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<SecurityGroupSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VmPublicIpv4AddressSettings {
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_: Option<VmStaticPublicIpv4AddressSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VmStaticPublicIpv4AddressSettings {
    #[serde(rename = "publicIPRef")]
    pub public_ip_ref: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_memberships: Vec<SecurityGroupMembershipRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecurityGroupMembershipRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// e.g. "Running", "Stopped", "Creating"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub virtual_machine_status: String,
    #[serde(default)]
    pub networking: VmNetworkStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VmNetworkStatus {
    #[serde(
        default,
        rename = "privateIPv4Address",
        skip_serializing_if = "String::is_empty"
    )]
    pub private_ipv4_address: String,
    #[serde(
        default,
        rename = "publicIPv4Address",
        skip_serializing_if = "String::is_empty"
    )]
    pub public_ipv4_address: String,
}

impl VirtualMachine {
    pub fn state(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.virtual_machine_status.as_str())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state() == VM_STATUS_RUNNING
    }

    /// Name of the static PublicIP this VM is attached to, if any
    pub fn public_ip_ref(&self) -> Option<&str> {
        self.spec
            .networking
            .as_ref()?
            .public_ipv4_address
            .as_ref()?
            .static_
            .as_ref()
            .map(|s| s.public_ip_ref.as_str())
            .filter(|s| !s.is_empty())
    }
}
