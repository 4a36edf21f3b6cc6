//! EvrocMachine and EvrocMachineTemplate Custom Resource Definitions
//!
//! An EvrocMachine is the infrastructure half of a Cluster API Machine: a
//! boot disk, an optional public IP and the virtual machine itself.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, MachineAddress};

/// Condition types reported on an EvrocMachine
pub const VM_READY_CONDITION: &str = "VMReady";
pub const BOOTSTRAP_DATA_READY_CONDITION: &str = "BootstrapDataReady";
pub const DISK_READY_CONDITION: &str = "DiskReady";
pub const PUBLIC_IP_READY_CONDITION: &str = "PublicIPReady";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.evroc.com",
    version = "v1beta1",
    kind = "EvrocMachine",
    namespaced,
    status = "EvrocMachineStatus",
    category = "cluster-api",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".metadata.labels.cluster\\.x-k8s\\.io/cluster-name"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.instanceState"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EvrocMachineSpec {
    /// Set by the controller once the VM is running: `evroc://<project>/<vm>`
    #[serde(
        default,
        rename = "providerID",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id: Option<String>,

    /// Machine type, e.g. `c1a.s`
    pub virtual_resources_ref: String,

    pub boot_disk: BootDiskSpec,

    /// Public SSH key injected into the VM
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key: String,

    /// Subnet from the owning EvrocCluster to attach to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,

    /// Attach a public IPv4 address to the VM
    #[serde(default, rename = "publicIP")]
    pub public_ip: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootDiskSpec {
    pub image_name: String,
    pub storage_class: String,
    #[serde(rename = "sizeGB")]
    pub size_gb: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvrocMachineStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,

    #[serde(
        default,
        rename = "providerID",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl EvrocMachine {
    pub fn status_mut(&mut self) -> &mut EvrocMachineStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.evroc.com",
    version = "v1beta1",
    kind = "EvrocMachineTemplate",
    namespaced,
    category = "cluster-api"
)]
pub struct EvrocMachineTemplateSpec {
    pub template: EvrocMachineTemplateResource,
}

/// Machine spec stamped out by Cluster API machine sets
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EvrocMachineTemplateResource {
    pub spec: EvrocMachineSpec,
}
