//! evroc infrastructure provider for Cluster API
//!
//! This crate reconciles `EvrocCluster` and `EvrocMachine` resources into
//! evroc cloud networking (VPC, subnets, public IPs) and compute (disks,
//! virtual machines), reporting readiness back to Cluster API.

pub mod cloud;
pub mod controller;
pub mod crd;
pub mod error;
pub mod leader;
pub mod telemetry;

#[cfg(feature = "metrics")]
pub mod server;

pub use crate::error::{Error, Result};
