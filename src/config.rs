// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Configuration types.
//!
//! Two layers of configuration drive the service:
//!
//! - [`ServiceConfig`] - service-wide settings, built once at startup from the
//!   command line and handed to the actuator constructor. Nothing is read from
//!   ambient global state afterwards.
//! - [`DnsConfig`] - the per-tenant provider configuration carried in
//!   `Extension.spec.providerConfig`, decoded fresh on every reconciliation.
//!
//! [`Timing`] groups all polling intervals and ceilings so that tests can run the
//! same code paths with shortened waits.

use crate::constants::{
    BUNDLE_DELETE_TIMEOUT_SECS, BUNDLE_POLL_INTERVAL_SECS, ENTRIES_STUCK_REQUEUE_SECS,
    ENTRY_DRAIN_ATTEMPTS, ENTRY_DRAIN_INTERVAL_SECS, LOCK_ATTEMPTS, PROVIDER_POLL_INTERVAL_SECS,
    PROVIDER_READY_TIMEOUT_SECS, RESTORE_PENDING_TIMEOUT_SECS, RESTORE_POLL_INTERVAL_SECS,
};
use crate::crd::{Extension, SecretReference};
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tenant DNS configuration decoded from the extension's provider config.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    /// Explicitly configured DNS providers.
    #[serde(default)]
    pub providers: Vec<DnsProviderConfig>,

    /// Take the providers from the shoot's `spec.dns.providers` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_providers_from_shoot_spec_dns: Option<bool>,

    /// Replication of DNS providers from the tenant cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_provider_replication: Option<DnsProviderReplication>,
}

/// Replication settings for DNS providers created inside the tenant cluster.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsProviderReplication {
    /// Whether replication is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// A single DNS provider declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsProviderConfig {
    /// Provider type, e.g. `aws-route53`; `unmanaged` is skipped.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Name of the shoot resource reference holding the credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Domain filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<IncludeExclude>,

    /// Hosted zone filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<IncludeExclude>,

    /// Marks the provider of the shoot's own domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

impl DnsProviderConfig {
    /// Whether this provider is flagged as primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary.unwrap_or(false)
    }
}

/// Include/exclude lists as written by users.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncludeExclude {
    /// Included values.
    #[serde(default)]
    pub include: Vec<String>,

    /// Excluded values.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl DnsConfig {
    /// Decode the tenant configuration from an extension.
    ///
    /// A missing provider config yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider config is present but malformed.
    pub fn from_extension(extension: &Extension) -> Result<Self> {
        match &extension.spec.provider_config {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(raw) => serde_json::from_value(raw.clone())
                .context("failed to decode shoot-dns-service provider config"),
        }
    }

    /// Whether providers are taken from the shoot's `spec.dns` section.
    #[must_use]
    pub fn sync_providers_from_shoot(&self) -> bool {
        self.sync_providers_from_shoot_spec_dns.unwrap_or(false)
    }

    /// Whether provider replication is enabled, falling back to the service default.
    #[must_use]
    pub fn replication_enabled(&self, service_default: bool) -> bool {
        self.dns_provider_replication
            .as_ref()
            .map_or(service_default, |r| r.enabled)
    }
}

/// Service-wide configuration, passed explicitly to every component that needs it.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Identity of the control-plane host (seed).
    pub seed_id: String,

    /// DNS class handled by the DNS controller deployed for tenants.
    pub dns_class: String,

    /// Secret for the remote default domain; when set it backs the primary provider.
    pub remote_default_domain_secret: Option<SecretReference>,

    /// Whether DNS providers are managed at all.
    pub manage_dns_providers: bool,

    /// Default for provider replication when the tenant does not say.
    pub replicate_dns_providers: bool,

    /// Whether a secondary (next generation) DNS controller handles entries while
    /// the tenant controller is being cleaned up.
    pub use_next_generation_controller: bool,

    /// Polling intervals and ceilings.
    pub timing: Timing,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            seed_id: String::new(),
            dns_class: "garden".to_string(),
            remote_default_domain_secret: None,
            manage_dns_providers: true,
            replicate_dns_providers: false,
            use_next_generation_controller: false,
            timing: Timing::default(),
        }
    }
}

/// Polling intervals and ceilings of every bounded wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Interval between checks while entries drain.
    pub entry_drain_interval: Duration,
    /// Number of drain checks before entries count as stuck.
    pub entry_drain_attempts: u32,
    /// Requeue delay after a stuck-entries error.
    pub entries_stuck_requeue: Duration,
    /// Ceiling for a resource bundle to disappear.
    pub bundle_delete_timeout: Duration,
    /// Interval between bundle deletion checks.
    pub bundle_poll_interval: Duration,
    /// Ceiling for restore-pending markers to clear.
    pub restore_pending_timeout: Duration,
    /// Interval between restore-pending checks.
    pub restore_poll_interval: Duration,
    /// Ceiling for a provider to become ready or disappear.
    pub provider_timeout: Duration,
    /// Interval between provider checks.
    pub provider_poll_interval: Duration,
    /// Attempts to take the tenant lock before giving up.
    pub lock_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            entry_drain_interval: Duration::from_secs(ENTRY_DRAIN_INTERVAL_SECS),
            entry_drain_attempts: ENTRY_DRAIN_ATTEMPTS,
            entries_stuck_requeue: Duration::from_secs(ENTRIES_STUCK_REQUEUE_SECS),
            bundle_delete_timeout: Duration::from_secs(BUNDLE_DELETE_TIMEOUT_SECS),
            bundle_poll_interval: Duration::from_secs(BUNDLE_POLL_INTERVAL_SECS),
            restore_pending_timeout: Duration::from_secs(RESTORE_PENDING_TIMEOUT_SECS),
            restore_poll_interval: Duration::from_secs(RESTORE_POLL_INTERVAL_SECS),
            provider_timeout: Duration::from_secs(PROVIDER_READY_TIMEOUT_SECS),
            provider_poll_interval: Duration::from_secs(PROVIDER_POLL_INTERVAL_SECS),
            lock_attempts: LOCK_ATTEMPTS,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
