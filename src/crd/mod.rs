//! Custom Resource Definitions for the evroc infrastructure provider
//!
//! This module defines the provider's own CRDs (EvrocCluster, EvrocMachine,
//! EvrocMachineTemplate) and the slice of the Cluster API core types that
//! the controllers read and write.

pub mod capi;
mod evroc_cluster;
mod evroc_machine;
pub mod types;


pub use capi::{Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec};
pub use evroc_cluster::{
    EvrocCluster, EvrocClusterSpec, EvrocClusterStatus, EvrocNetworkSpec, EvrocNetworkStatus,
    EvrocSubnetSpec, EvrocSubnetStatus, EvrocVpcSpec, EvrocVpcStatus, NETWORK_READY_CONDITION,
    SUBNETS_READY_CONDITION, VPC_READY_CONDITION,
};
pub use evroc_machine::{
    BootDiskSpec, EvrocMachine, EvrocMachineSpec, EvrocMachineStatus, EvrocMachineTemplate,
    EvrocMachineTemplateResource, EvrocMachineTemplateSpec, BOOTSTRAP_DATA_READY_CONDITION,
    DISK_READY_CONDITION, PUBLIC_IP_READY_CONDITION, VM_READY_CONDITION,
};
pub use types::*;
