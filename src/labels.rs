// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines the labels and annotations that act as control signals
//! between this service, the DNS controller, and the surrounding extension
//! framework, plus the helpers that turn arbitrary identifiers into valid
//! label values and object names.

use crate::constants::MAX_NAME_LENGTH;
use sha2::{Digest, Sha256};

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on everything this service creates
pub const MANAGED_BY_SHOOT_DNS_SERVICE: &str = "shoot-dns-service";

// ============================================================================
// Ownership Labels
// ============================================================================

/// Label carrying the stable, shortened tenant identity on DNS entries
pub const LABEL_SHOOT_ID: &str = "gardener.cloud/shoot-id";

/// Role label selecting the DNS providers owned by this service
pub const LABEL_ROLE: &str = "gardener.cloud/role";

/// Role value for managed DNS providers
pub const ROLE_MANAGED_DNS_PROVIDER: &str = "managed-dns-provider";

/// Label marking a DNS provider replicated from the tenant cluster
pub const LABEL_REPLICATED: &str = "dns.gardener.cloud/replicated";

/// Label marking the bundle owner on resource bundles
pub const LABEL_BUNDLE_ORIGIN: &str = "resources.gardener.cloud/origin";

// ============================================================================
// Control Annotations
// ============================================================================

/// Timestamp written on every deploy, used to detect stale observations
pub const ANNOTATION_TIMESTAMP: &str = "gardener.cloud/timestamp";

/// Maintainer marker written by the deploy abstraction
pub const ANNOTATION_MAINTAINER: &str = "dns.gardener.cloud/maintainer";

/// DNS class responsible for a provider or entry
pub const ANNOTATION_DNS_CLASS: &str = "dns.gardener.cloud/class";

/// Annotation telling the DNS controller to stop acting on an entry
pub const ANNOTATION_IGNORE: &str = "dns.gardener.cloud/ignore";

/// Value of [`ANNOTATION_IGNORE`] that suppresses every external effect
pub const IGNORE_FULL: &str = "full";

/// Operation annotation used by the extension framework and the DNS controller
pub const ANNOTATION_OPERATION: &str = "gardener.cloud/operation";

/// Operation value requesting a migration
pub const OPERATION_MIGRATE: &str = "migrate";

/// Operation value requesting a restore
pub const OPERATION_RESTORE: &str = "restore";

/// Operation value requesting a reconciliation (pending-operation marker on entries)
pub const OPERATION_RECONCILE: &str = "reconcile";

/// Marker on the extension asking to drop the DNS entry state on migration
pub const ANNOTATION_DROP_STATE: &str =
    "shoot-dns-service.extensions.gardener.cloud/drop-state-on-migration";

/// Marker on the extension confirming forced deletion
pub const ANNOTATION_FORCE_DELETE: &str = "confirmation.gardener.cloud/force-deletion";

/// Annotation written by `kubectl apply`, never captured into the snapshot
pub const ANNOTATION_LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `Extension` resources handled by this service
pub const FINALIZER_EXTENSION: &str = "extensions.gardener.cloud/shoot-dns-service";

/// Returns `true` when an annotation must not be carried in the entry snapshot.
#[must_use]
pub fn is_transient_annotation(key: &str) -> bool {
    key == ANNOTATION_LAST_APPLIED
}

/// Shorten an identifier to at most `max_len` characters.
///
/// Identifiers that already fit are returned unchanged. Longer identifiers keep
/// a deterministic prefix of `max_len - 8` characters followed by `-` and the
/// first seven hex digits of the identifier's SHA-256 digest, so the result is
/// exactly `max_len` characters long and stable across calls.
///
/// # Panics
///
/// Panics if `max_len` is smaller than 16, which would leave no meaningful prefix.
#[must_use]
pub fn shorten_id(id: &str, max_len: usize) -> String {
    assert!(max_len >= 16, "max_len must be at least 16, got {max_len}");
    if id.len() <= max_len {
        return id.to_string();
    }

    let digest = Sha256::digest(id.as_bytes());
    let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    // Cut on a char boundary so multibyte identifiers never split.
    let mut cut = max_len - 8;
    while !id.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut short = id[..cut].to_string();
    while short.len() < max_len - 8 {
        short.push('x');
    }
    format!("{short}-{}", &hash[..7])
}

/// Tenant label value derived from the cluster identity.
#[must_use]
pub fn shoot_id_label_value(cluster_identity: &str) -> String {
    shorten_id(cluster_identity, MAX_NAME_LENGTH)
}

/// Deterministic DNS provider name for a provider type and credential reference.
///
/// Characters that are not valid in object names are replaced with `-`.
#[must_use]
pub fn provider_name(provider_type: &str, secret_name: &str) -> String {
    let raw = format!("{provider_type}-{secret_name}");
    let sanitized: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    shorten_id(sanitized.trim_matches('-'), MAX_NAME_LENGTH)
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
