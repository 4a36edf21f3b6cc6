//! EvrocCluster Custom Resource Definition
//!
//! The EvrocCluster CRD describes the cluster-wide infrastructure of a
//! Cluster API cluster running on evroc: the VPC, its subnets and the
//! pre-allocated control plane public IP.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition};

/// Condition types reported on an EvrocCluster
pub const NETWORK_READY_CONDITION: &str = "NetworkReady";
pub const VPC_READY_CONDITION: &str = "VPCReady";
pub const SUBNETS_READY_CONDITION: &str = "SubnetsReady";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.evroc.com",
    version = "v1beta1",
    kind = "EvrocCluster",
    namespaced,
    status = "EvrocClusterStatus",
    category = "cluster-api",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".metadata.labels.cluster\\.x-k8s\\.io/cluster-name"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"VPC","type":"string","jsonPath":".status.network.vpc.name"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.controlPlaneEndpoint.host","priority":1}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EvrocClusterSpec {
    /// evroc region to deploy into
    pub region: String,

    /// evroc project that owns every provisioned resource
    pub project: String,

    /// Secret in the same namespace holding a kubeconfig for the evroc API
    pub identity_secret_name: String,

    /// Endpoint of the workload cluster's API server
    #[serde(default, skip_serializing_if = "ApiEndpoint::is_zero")]
    pub control_plane_endpoint: ApiEndpoint,

    pub network: EvrocNetworkSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EvrocNetworkSpec {
    #[serde(default)]
    pub vpc: EvrocVpcSpec,

    pub subnets: Vec<EvrocSubnetSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EvrocVpcSpec {
    /// VPC name; defaults to the EvrocCluster name when empty
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvrocSubnetSpec {
    pub name: String,
    pub cidr_block: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvrocClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub network: EvrocNetworkStatus,

    /// Name of the PublicIP reserved for the control plane endpoint
    #[serde(
        default,
        rename = "controlPlanePublicIPName",
        skip_serializing_if = "String::is_empty"
    )]
    pub control_plane_public_ip_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EvrocNetworkStatus {
    #[serde(default)]
    pub vpc: EvrocVpcStatus,

    #[serde(default)]
    pub subnets: Vec<EvrocSubnetStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EvrocVpcStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvrocSubnetStatus {
    pub name: String,
    pub id: String,
    pub cidr_block: String,
    pub ready: bool,
}

impl EvrocCluster {
    /// Name of the VPC backing this cluster
    pub fn vpc_name(&self) -> String {
        if self.spec.network.vpc.name.is_empty() {
            self.metadata.name.clone().unwrap_or_default()
        } else {
            self.spec.network.vpc.name.clone()
        }
    }

    /// Deterministic name of the control plane PublicIP
    pub fn control_plane_public_ip_name(&self) -> String {
        format!(
            "{}-cp-publicip",
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub fn status_mut(&mut self) -> &mut EvrocClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
