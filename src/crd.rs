// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) used by the shoot DNS service.
//!
//! # Resource Types
//!
//! ## Extension framework
//!
//! - [`Extension`] - One DNS add-on instance per tenant control-plane namespace
//! - [`Cluster`] - Cluster-scoped tenant descriptor (shoot, seed, cloud profile)
//! - [`DNSRecord`] - Sibling record resource holding the external domain credentials
//! - [`ManagedResource`] - Resource bundle applied and deleted as a unit
//!
//! ## DNS controller
//!
//! - [`DNSEntry`] - A desired DNS record consumed by the DNS controller
//! - [`DNSProvider`] - A provider credential/scope descriptor consumed by the DNS controller
//!
//! Only [`Extension`] status and [`DNSProvider`]/[`DNSEntry`] objects are written
//! by this service; the other kinds are read or owned by collaborators.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Extension
// ============================================================================

/// Extension resource driving the DNS add-on lifecycle of one tenant.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Extension",
    namespaced,
    status = "ExtensionStatus",
    shortname = "ext",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.lastOperation.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Extension type, `shoot-dns-service` for this service.
    #[serde(rename = "type")]
    pub type_: String,

    /// Tenant DNS configuration, decoded into [`crate::config::DnsConfig`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

/// Status of an [`Extension`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    /// Outcome of the last lifecycle operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Generation observed by the last successful reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Persisted DNS entry snapshot (compressed envelope or legacy raw form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

/// Last lifecycle operation reported on an [`Extension`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// Operation type: Reconcile, Delete, Migrate or Restore.
    #[serde(rename = "type")]
    pub type_: String,

    /// Operation state: Processing, Succeeded, Error or Failed.
    pub state: String,

    /// Human-readable description, carries the error message on failure.
    pub description: String,

    /// RFC3339 timestamp of the last update.
    pub last_update_time: String,

    /// Progress in percent.
    pub progress: i32,
}

// ============================================================================
// Cluster
// ============================================================================

/// Tenant descriptor published by the extension framework, named after the
/// control-plane namespace.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "extensions.gardener.cloud", version = "v1alpha1", kind = "Cluster")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Raw shoot (tenant) specification.
    pub shoot: serde_json::Value,

    /// Raw seed (control plane) specification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<serde_json::Value>,

    /// Raw cloud profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_profile: Option<serde_json::Value>,
}

// ============================================================================
// DNSRecord
// ============================================================================

/// Sibling DNS record resource; the one named `<shoot name>-external` supplies the
/// credentials of the primary provider.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "DNSRecord",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DNSRecordSpec {
    /// Provider type, e.g. `aws-route53`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Credentials used to manage the record.
    pub secret_ref: SecretReference,

    /// Hosted zone, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Fully qualified record name.
    pub name: String,

    /// Record type (A, CNAME, ...).
    pub record_type: String,

    /// Record values.
    #[serde(default)]
    pub values: Vec<String>,
}

/// Reference to a secret, optionally in another namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name.
    pub name: String,

    /// Secret namespace, defaults to the namespace of the referencing object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ============================================================================
// DNSEntry
// ============================================================================

/// Desired DNS record consumed by the DNS controller.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dns.gardener.cloud",
    version = "v1alpha1",
    kind = "DNSEntry",
    namespaced,
    status = "DNSEntryStatus",
    shortname = "dnse",
    printcolumn = r#"{"name":"DNS","type":"string","jsonPath":".spec.dnsName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSEntrySpec {
    /// Fully qualified domain name of the record.
    pub dns_name: String,

    /// Owner identity, if the entry is owned by a DNS owner object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Record TTL in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Lookup interval for CNAME targets resolved to addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname_lookup_interval: Option<i64>,

    /// TXT record values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,

    /// Address or CNAME targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,

    /// Provider-specific routing policy, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_policy: Option<serde_json::Value>,
}

/// Status of a [`DNSEntry`] as reported by the DNS controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DNSEntryStatus {
    /// Processing state (Ready, Pending, Error, Invalid, Stale, Deleting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Message explaining the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the provider responsible for the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Type of the responsible provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    /// Hosted zone of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Generation observed by the DNS controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// ============================================================================
// DNSProvider
// ============================================================================

/// DNS provider credential/scope descriptor consumed by the DNS controller.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dns.gardener.cloud",
    version = "v1alpha1",
    kind = "DNSProvider",
    namespaced,
    status = "DNSProviderStatus",
    shortname = "dnspr",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DNSProviderSpec {
    /// Provider type, e.g. `aws-route53`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Credentials of the provider account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,

    /// Domains the provider may serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<SelectionCriteria>,

    /// Hosted zones the provider may serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<SelectionCriteria>,

    /// Default TTL of records served by this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<i64>,
}

/// Include/exclude filter for domains or zones.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionCriteria {
    /// Included values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Excluded values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl SelectionCriteria {
    /// Returns `None` when both lists are empty so the field is omitted.
    #[must_use]
    pub fn non_empty(include: Vec<String>, exclude: Vec<String>) -> Option<Self> {
        if include.is_empty() && exclude.is_empty() {
            None
        } else {
            Some(Self { include, exclude })
        }
    }
}

/// Status of a [`DNSProvider`] as reported by the DNS controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DNSProviderStatus {
    /// Provider state (Ready, Error, Invalid, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Message explaining the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation observed by the DNS controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// ============================================================================
// ManagedResource
// ============================================================================

/// Bundle of rendered objects applied and deleted as a unit by the resource manager.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "resources.gardener.cloud",
    version = "v1alpha1",
    kind = "ManagedResource",
    namespaced,
    shortname = "mr"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Class of the resource manager responsible; `seed` targets the control plane,
    /// absent targets the tenant cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Secrets carrying the rendered bundle content.
    #[serde(default)]
    pub secret_refs: Vec<LocalObjectReference>,

    /// Keep the objects in the target cluster when the bundle is deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,

    /// Labels injected into every object of the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject_labels: Option<BTreeMap<String, String>>,
}

/// Reference to an object in the same namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Object name.
    pub name: String,
}
