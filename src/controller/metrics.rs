//! Prometheus metrics for the evroc infrastructure provider
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `evroc_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `evroc_reconcile_errors_total` (counter): reconcile errors labeled by controller and error class.
//! - `evroc_reconcile_requeues_total` (counter): passes that asked to be polled again, by controller.
//! - `evroc_cloud_resources_created_total` (counter): evroc resources created, by kind.
//! - `evroc_cloud_resources_deleted_total` (counter): evroc resources deleted, by kind.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "evroccluster"
    pub controller: String,
}

/// Labels for reconcile error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// "transient", "terminal" or "unknown"
    pub class: String,
}

/// Labels for evroc resource metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    /// evroc kind, e.g. "VirtualMachine"
    pub kind: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_REQUEUES_TOTAL: Lazy<Family<ReconcileLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CLOUD_RESOURCES_CREATED_TOTAL: Lazy<Family<ResourceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CLOUD_RESOURCES_DELETED_TOTAL: Lazy<Family<ResourceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global registry served on `/metrics`
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "evroc_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "evroc_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "evroc_reconcile_requeues_total",
        "Total number of reconcile passes that requested a requeue",
        RECONCILE_REQUEUES_TOTAL.clone(),
    );
    registry.register(
        "evroc_cloud_resources_created_total",
        "Total number of evroc resources created",
        CLOUD_RESOURCES_CREATED_TOTAL.clone(),
    );
    registry.register(
        "evroc_cloud_resources_deleted_total",
        "Total number of evroc resources deleted",
        CLOUD_RESOURCES_DELETED_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, class: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        class: class.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_reconcile_requeue(controller: &str) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_REQUEUES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_cloud_resource_created(kind: &str) {
    let labels = ResourceLabels {
        kind: kind.to_string(),
    };
    CLOUD_RESOURCES_CREATED_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_cloud_resource_deleted(kind: &str) {
    let labels = ResourceLabels {
        kind: kind.to_string(),
    };
    CLOUD_RESOURCES_DELETED_TOTAL.get_or_create(&labels).inc();
}
