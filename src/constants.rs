// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the shoot DNS service.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group of the DNS controller resources (`DNSEntry`, `DNSProvider`)
pub const DNS_API_GROUP: &str = "dns.gardener.cloud";

/// API version of the DNS resources
pub const API_VERSION: &str = "v1alpha1";

/// Extension type handled by this service
pub const EXTENSION_TYPE: &str = "shoot-dns-service";

/// Name of the service, used as field manager and in resource names
pub const SERVICE_NAME: &str = "shoot-dns-service";

/// Name of the `Extension` object in every control-plane namespace
pub const EXTENSION_NAME: &str = "shoot-dns-service";

/// Maximum attempts of one replication event while the tenant lock is busy
pub const REPLICATION_LOCK_ATTEMPTS: u32 = 50;

// ============================================================================
// Resource Names
// ============================================================================

/// Name of the resource bundle deployed into the control-plane namespace
pub const SEED_BUNDLE_NAME: &str = "extension-shoot-dns-service-seed";

/// Name of the resource bundle deployed into the tenant cluster
pub const SHOOT_BUNDLE_NAME: &str = "extension-shoot-dns-service-shoot";

/// Template (chart) name of the control-plane bundle
pub const SEED_BUNDLE_TEMPLATE: &str = "shoot-dns-service-seed";

/// Template (chart) name of the tenant-side bundle
pub const SHOOT_BUNDLE_TEMPLATE: &str = "shoot-dns-service-shoot";

/// Bundle class targeting the control plane only
pub const BUNDLE_CLASS_SEED: &str = "seed";

/// Fixed name of the primary ("external") DNS provider
pub const EXTERNAL_PROVIDER_NAME: &str = "external";

/// Suffix of the sibling `DNSRecord` carrying the external domain credentials
pub const EXTERNAL_DNS_RECORD_SUFFIX: &str = "-external";

/// Prefix of control-plane secrets copied from shoot resource references
pub const REFERENCED_RESOURCES_PREFIX: &str = "ref-";

/// Secret holding the kubeconfig used to reach the tenant cluster
pub const SHOOT_KUBECONFIG_SECRET: &str = "shoot-access-shoot-dns-service";

/// Provider type that is deliberately skipped
pub const PROVIDER_TYPE_UNMANAGED: &str = "unmanaged";

/// Provider type used for the remote default domain
pub const PROVIDER_TYPE_REMOTE: &str = "remote";

/// Maximum length of label values and most object names
pub const MAX_NAME_LENGTH: usize = 63;

// ============================================================================
// Timing Constants
// ============================================================================

/// Interval between checks while waiting for DNS entries to drain
pub const ENTRY_DRAIN_INTERVAL_SECS: u64 = 3;

/// Number of drain checks before entries are reported as stuck
pub const ENTRY_DRAIN_ATTEMPTS: u32 = 10;

/// Requeue delay after a stuck-entries error
pub const ENTRIES_STUCK_REQUEUE_SECS: u64 = 15;

/// Timeout for a resource bundle to disappear after deletion
pub const BUNDLE_DELETE_TIMEOUT_SECS: u64 = 120;

/// Ceiling for restore-pending markers to clear
pub const RESTORE_PENDING_TIMEOUT_SECS: u64 = 180;

/// Interval between restore-pending checks
pub const RESTORE_POLL_INTERVAL_SECS: u64 = 5;

/// Timeout for a deployed DNS provider to become ready
pub const PROVIDER_READY_TIMEOUT_SECS: u64 = 120;

/// Interval between DNS provider readiness checks
pub const PROVIDER_POLL_INTERVAL_SECS: u64 = 2;

/// Interval between bundle deletion checks
pub const BUNDLE_POLL_INTERVAL_SECS: u64 = 2;

/// Number of attempts to take the tenant lock before giving up
pub const LOCK_ATTEMPTS: u32 = 20;

/// Upper bound of the jitter applied when the tenant lock is busy (milliseconds)
pub const LOCK_JITTER_MAX_MILLIS: u64 = 200;

/// Lower bound of the jitter applied when the tenant lock is busy (milliseconds)
pub const LOCK_JITTER_MIN_MILLIS: u64 = 50;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration after a successful reconciliation (10 minutes)
pub const SUCCESS_REQUEUE_DURATION_SECS: u64 = 600;

/// Page size for paginated list calls
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease name
pub const DEFAULT_LEASE_NAME: &str = "shoot-dns-service-leader";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election grace period (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Maximum number of replication events handled concurrently
pub const REPLICATION_CONCURRENCY: usize = 8;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
