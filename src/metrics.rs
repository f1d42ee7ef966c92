// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the shoot DNS service.
//!
//! All metrics carry the prefix `shoot_dns_service_`.
//!
//! # Metrics Categories
//!
//! - **Lifecycle Metrics** - operations by type and outcome, with durations
//! - **State Metrics** - size of the persisted DNS entry snapshot
//! - **Concurrency Metrics** - contention on the per-tenant state lock
//! - **Provider Metrics** - DNS provider deployments and deletions
//! - **Replication Metrics** - DNS entry events fed into tenant snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use shoot_dns_service::metrics::record_operation_success;
//!
//! record_operation_success("reconcile", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all metrics
const METRICS_NAMESPACE: &str = "shoot_dns_service";

/// Global Prometheus metrics registry, exposed via the `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Lifecycle Metrics
// ============================================================================

/// Lifecycle operations by type and outcome
///
/// Labels:
/// - `operation`: `reconcile`, `delete`, `force_delete`, `migrate`, `restore`
/// - `status`: `success`, `error`
pub static OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_operations_total"),
        "Total number of lifecycle operations by type and status",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of lifecycle operations in seconds
pub static OPERATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_operation_duration_seconds"),
        "Duration of lifecycle operations in seconds by type",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// State Metrics
// ============================================================================

/// Size of the persisted (compressed) DNS entry state in bytes, per tenant namespace
pub static PERSISTED_STATE_BYTES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_persisted_state_bytes"),
        "Size of the persisted DNS entry state by tenant namespace",
    );
    let gauge = GaugeVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Concurrency Metrics
// ============================================================================

/// Failed attempts to take a tenant state lock
///
/// Labels:
/// - `source`: `actuator` or `replication`
pub static LOCK_CONTENTION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_lock_contention_total"),
        "Total number of failed tenant state lock acquisitions by source",
    );
    let counter = CounterVec::new(opts, &["source"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Provider Metrics
// ============================================================================

/// DNS provider deployments and deletions
///
/// Labels:
/// - `action`: `deploy`, `destroy`
/// - `status`: `success`, `error`
pub static PROVIDER_ACTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_provider_actions_total"),
        "Total number of DNS provider actions by action and status",
    );
    let counter = CounterVec::new(opts, &["action", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Replication Metrics
// ============================================================================

/// DNS entry events applied to tenant snapshots
///
/// Labels:
/// - `event`: `apply`, `delete`, `skipped`
pub static REPLICATION_EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_replication_events_total"),
        "Total number of DNS entry events handled by the replication reconciler",
    );
    let counter = CounterVec::new(opts, &["event"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// 1 while this replica holds the leader lease
pub static LEADER_STATUS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        format!("{METRICS_NAMESPACE}_leader"),
        "Whether this replica currently holds the leader lease",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful lifecycle operation
pub fn record_operation_success(operation: &str, duration: Duration) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, "success"])
        .inc();
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a failed lifecycle operation
pub fn record_operation_error(operation: &str, duration: Duration) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, "error"])
        .inc();
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record the size of a tenant's persisted state
#[allow(clippy::cast_precision_loss)]
pub fn record_persisted_state_size(namespace: &str, bytes: usize) {
    PERSISTED_STATE_BYTES
        .with_label_values(&[namespace])
        .set(bytes as f64);
}

/// Drop the persisted-state series of a tenant that left this seed
pub fn forget_persisted_state_size(namespace: &str) {
    // Absent series are fine, the tenant may never have persisted state here
    let _ = PERSISTED_STATE_BYTES.remove_label_values(&[namespace]);
}

/// Record a failed tenant lock acquisition
pub fn record_lock_contention(source: &str) {
    LOCK_CONTENTION_TOTAL.with_label_values(&[source]).inc();
}

/// Record a DNS provider action
pub fn record_provider_action(action: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    PROVIDER_ACTIONS_TOTAL
        .with_label_values(&[action, status])
        .inc();
}

/// Record a replication event
pub fn record_replication_event(event: &str) {
    REPLICATION_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

/// Record leadership changes
pub fn record_leader(is_leader: bool) {
    LEADER_STATUS.set(i64::from(is_leader));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation_success() {
        record_operation_success("test_reconcile", Duration::from_millis(500));

        let counter = OPERATIONS_TOTAL.with_label_values(&["test_reconcile", "success"]);
        assert!(counter.get() > 0.0);
        let histogram = OPERATION_DURATION_SECONDS.with_label_values(&["test_reconcile"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_operation_error() {
        record_operation_error("test_delete", Duration::from_millis(250));

        let counter = OPERATIONS_TOTAL.with_label_values(&["test_delete", "error"]);
        assert!(counter.get() > 0.0);
    }

    #[test]
    fn test_record_persisted_state_size_overwrites() {
        record_persisted_state_size("shoot--metrics--test", 100);
        record_persisted_state_size("shoot--metrics--test", 42);
        #[allow(clippy::float_cmp)]
        {
            assert_eq!(
                PERSISTED_STATE_BYTES
                    .with_label_values(&["shoot--metrics--test"])
                    .get(),
                42.0
            );
        }
    }

    #[test]
    fn test_forget_persisted_state_size_removes_series() {
        record_persisted_state_size("shoot--metrics--gone", 64);
        assert!(gather_metrics().unwrap().contains("shoot--metrics--gone"));

        forget_persisted_state_size("shoot--metrics--gone");
        assert!(!gather_metrics().unwrap().contains("shoot--metrics--gone"));

        // Forgetting twice is harmless
        forget_persisted_state_size("shoot--metrics--gone");
    }

    #[test]
    fn test_gather_metrics() {
        record_lock_contention("gather_test");
        record_provider_action("deploy", true);

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("shoot_dns_service_lock_contention_total"));
        assert!(metrics_text.contains("shoot_dns_service_provider_actions_total"));
    }
}
