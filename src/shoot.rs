// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant (shoot) descriptor decoded from the [`Cluster`] resource.
//!
//! The `Cluster` resource carries the full shoot manifest as raw JSON. Only the
//! handful of fields the DNS add-on cares about are decoded here; unknown fields
//! are ignored so that newer shoot manifests keep working.

use crate::config::DnsProviderConfig;
use crate::crd::Cluster;
use anyhow::{Context as _, Result};
use kube::ResourceExt;
use serde::Deserialize;

/// The subset of the tenant's specification needed by the DNS add-on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShootDescriptor {
    /// Shoot name.
    pub name: String,
    /// Project namespace of the shoot.
    pub project_namespace: String,
    /// Control-plane namespace (technical id).
    pub technical_id: String,
    /// Stable cluster identity; falls back to the technical id.
    pub cluster_identity: String,
    /// The shoot's own DNS domain, if any.
    pub domain: Option<String>,
    /// Whether the shoot is hibernated (or hibernating).
    pub hibernated: bool,
    /// Whether the shoot itself is being deleted.
    pub deleting: bool,
    /// Named resource references (credentials are resolved through these).
    pub resources: Vec<NamedResourceReference>,
    /// Providers declared in the shoot's `spec.dns.providers`.
    pub dns_providers: Vec<DnsProviderConfig>,
}

/// A named reference from the shoot's `spec.resources`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamedResourceReference {
    /// Reference name used inside the shoot spec.
    pub name: String,
    /// Referenced object.
    pub resource_ref: CrossVersionObjectReference,
}

/// Kind and name of a referenced object.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    /// Object kind (`Secret`, `WorkloadIdentity`, ...).
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Object API version.
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawShoot {
    #[serde(default)]
    metadata: RawMeta,
    #[serde(default)]
    spec: RawShootSpec,
    #[serde(default)]
    status: RawShootStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawShootSpec {
    #[serde(default)]
    dns: Option<RawDns>,
    #[serde(default)]
    hibernation: Option<RawHibernation>,
    #[serde(default)]
    resources: Vec<NamedResourceReference>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawDns {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    providers: Vec<DnsProviderConfig>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawHibernation {
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawShootStatus {
    #[serde(default, rename = "technicalID")]
    technical_id: Option<String>,
    #[serde(default)]
    cluster_identity: Option<String>,
    #[serde(default)]
    is_hibernated: Option<bool>,
}

impl ShootDescriptor {
    /// Decode the descriptor from a `Cluster` resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded shoot manifest cannot be decoded.
    pub fn from_cluster(cluster: &Cluster) -> Result<Self> {
        let raw: RawShoot = serde_json::from_value(cluster.spec.shoot.clone())
            .with_context(|| format!("failed to decode shoot of cluster {}", cluster.name_any()))?;

        let technical_id = raw
            .status
            .technical_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| cluster.name_any());
        let cluster_identity = raw
            .status
            .cluster_identity
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| technical_id.clone());

        let hibernation_requested = raw
            .spec
            .hibernation
            .and_then(|h| h.enabled)
            .unwrap_or(false);
        let (domain, dns_providers) = raw
            .spec
            .dns
            .map(|dns| (dns.domain.filter(|d| !d.is_empty()), dns.providers))
            .unwrap_or_default();

        Ok(Self {
            name: raw.metadata.name,
            project_namespace: raw.metadata.namespace,
            technical_id,
            cluster_identity,
            domain,
            hibernated: hibernation_requested || raw.status.is_hibernated.unwrap_or(false),
            deleting: raw.metadata.deletion_timestamp.is_some(),
            resources: raw.spec.resources,
            dns_providers,
        })
    }

    /// Look up a named resource reference.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&NamedResourceReference> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Whether one of the shoot's own DNS providers is flagged primary.
    #[must_use]
    pub fn has_primary_provider(&self) -> bool {
        self.dns_providers.iter().any(DnsProviderConfig::is_primary)
    }
}

#[cfg(test)]
#[path = "shoot_tests.rs"]
mod shoot_tests;
