// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for certshim.
//!
//! All metrics carry the `certshim_` prefix and are exposed on `/metrics`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Reconcile outcomes, durations and requeues
//! - **Certificate Lifecycle Metrics** - Certificates created, updated and deleted
//! - **Conflict and Error Metrics** - Lost ownership conflicts and errors by kind
//! - **Queue Metrics** - Work queue depth
//!
//! # Example
//!
//! ```rust,no_run
//! use certshim::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("Ingress", std::time::Duration::from_millis(12));
//! ```

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all certshim metrics
const METRICS_NAMESPACE: &str = "certshim";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource kind and status
///
/// Labels:
/// - `resource_type`: Kind of watched resource (`Ingress`, `Gateway`)
/// - `status`: Outcome (`success`, `conflict`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `resource_type`: Kind of watched resource
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeues
///
/// Labels:
/// - `resource_type`: Kind of watched resource
/// - `reason`: `conflict`, `invalid` or `rate_limited`
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Certificate Lifecycle Metrics
// ============================================================================

fn certificate_counter(name: &str, help: &str) -> CounterVec {
    let opts = Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help);
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
}

/// Certificates created, by the kind of the owning resource
pub static CERTIFICATES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    certificate_counter(
        "certificates_created_total",
        "Total number of Certificates created by owning resource type",
    )
});

/// Certificates patched or adopted, by the kind of the owning resource
pub static CERTIFICATES_UPDATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    certificate_counter(
        "certificates_updated_total",
        "Total number of Certificates updated by owning resource type",
    )
});

/// Certificates deleted, by the kind of the owning resource
pub static CERTIFICATES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    certificate_counter(
        "certificates_deleted_total",
        "Total number of Certificates deleted by owning resource type",
    )
});

// ============================================================================
// Conflict and Error Metrics
// ============================================================================

/// Candidates skipped because another resource or a foreign object holds the secret
pub static CONFLICTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    certificate_counter(
        "conflicts_total",
        "Total number of secret ownership conflicts by resource type",
    )
});

/// Total number of failed reconciles by error kind
///
/// Labels:
/// - `resource_type`: Kind of watched resource
/// - `error_type`: `nil_target`, `invalid_input`, `conflict` or `transient`
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource type and error category",
    );
    let counter = CounterVec::new(opts, &["resource_type", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Queue Metrics
// ============================================================================

/// Keys waiting in the work queue
pub static QUEUE_DEPTH: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_queue_depth"),
        "Number of resource keys waiting in the work queue",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a reconcile that finished without conflicts
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconcile that finished but lost at least one ownership conflict
pub fn record_reconciliation_conflict(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "conflict"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconcile
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `error_type` - Error kind (see [`crate::errors::ErrorKind::as_str`])
/// * `duration` - Duration of the reconcile before failure
pub fn record_reconciliation_error(resource_type: &str, error_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Record a requeue
pub fn record_requeue(resource_type: &str, reason: &str) {
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

pub fn record_certificate_created(resource_type: &str) {
    CERTIFICATES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

pub fn record_certificate_updated(resource_type: &str) {
    CERTIFICATES_UPDATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

pub fn record_certificate_deleted(resource_type: &str) {
    CERTIFICATES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

pub fn record_conflict(resource_type: &str) {
    CONFLICTS_TOTAL.with_label_values(&[resource_type]).inc();
}

/// Publish the current work queue depth
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
