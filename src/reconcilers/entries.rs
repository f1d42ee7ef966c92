// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Bulk operations on a tenant's DNS entries in the control-plane namespace.

use crate::config::Timing;
use crate::crd::DNSEntry;
use crate::errors::ActuatorError;
use crate::labels::{ANNOTATION_IGNORE, ANNOTATION_OPERATION, IGNORE_FULL};
use crate::reconcilers::retry::{poll_until, Ticker};
use crate::state::StateManager;
use crate::store::{Labels, SeedStore};
use anyhow::Result;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// Delete all entries matching `selector` and wait until they are gone.
///
/// # Errors
///
/// Returns [`ActuatorError::EntriesStuck`] when entries remain after
/// `timing.entry_drain_attempts` checks, or a store error.
pub async fn drain_entries(
    store: &dyn SeedStore,
    namespace: &str,
    selector: &Labels,
    timing: &Timing,
) -> Result<()> {
    store.delete_entries(namespace, selector).await?;
    let mut ticker = Ticker::with_attempts(timing.entry_drain_interval, timing.entry_drain_attempts);

    loop {
        let remaining = store.list_entries(namespace, selector).await?;
        if remaining.is_empty() {
            info!(namespace, "All DNS entries deleted");
            return Ok(());
        }
        debug!(namespace, remaining = remaining.len(), "Waiting for DNS entries to be deleted");
        if !ticker.tick().await {
            let summary = stuck_summary(&remaining);
            warn!(namespace, count = remaining.len(), summary = %summary, "DNS entries stuck in deletion");
            return Err(ActuatorError::EntriesStuck {
                count: remaining.len(),
                summary,
                retry_after: timing.entries_stuck_requeue,
            }
            .into());
        }
    }
}

/// Describe residual entries, grouped by provider and status message.
#[must_use]
pub fn stuck_summary(entries: &[DNSEntry]) -> String {
    let mut groups: BTreeMap<(String, String), usize> = BTreeMap::new();
    for entry in entries {
        let status = entry.status.as_ref();
        let provider = status
            .and_then(|s| s.provider.clone())
            .unwrap_or_else(|| "<no provider>".to_string());
        let message = status
            .and_then(|s| s.message.clone())
            .or_else(|| status.and_then(|s| s.state.clone()))
            .unwrap_or_else(|| "no status".to_string());
        *groups.entry((provider, message)).or_default() += 1;
    }

    let mut summary = String::new();
    for ((provider, message), count) in groups {
        if !summary.is_empty() {
            summary.push_str(", ");
        }
        let _ = write!(summary, "{count} on {provider} ({message})");
    }
    summary
}

/// Mark every matching entry to be ignored by the DNS controller.
///
/// # Errors
///
/// Returns the first store error.
pub async fn annotate_ignore(store: &dyn SeedStore, namespace: &str, selector: &Labels) -> Result<usize> {
    let changes = BTreeMap::from([(ANNOTATION_IGNORE.to_string(), Some(IGNORE_FULL.to_string()))]);
    let mut annotated = 0;
    for entry in store.list_entries(namespace, selector).await? {
        if entry.annotations().get(ANNOTATION_IGNORE).map(String::as_str) == Some(IGNORE_FULL) {
            continue;
        }
        store
            .patch_entry_annotations(namespace, &entry.name_any(), &changes)
            .await?;
        annotated += 1;
    }
    debug!(namespace, annotated, "Marked DNS entries as ignored");
    Ok(annotated)
}

/// Remove the ignore and operation markers from every matching entry.
///
/// # Errors
///
/// Returns the first store error.
pub async fn clear_markers(store: &dyn SeedStore, namespace: &str, selector: &Labels) -> Result<usize> {
    let changes = BTreeMap::from([
        (ANNOTATION_IGNORE.to_string(), None),
        (ANNOTATION_OPERATION.to_string(), None),
    ]);
    let mut cleared = 0;
    for entry in store.list_entries(namespace, selector).await? {
        let annotations = entry.annotations();
        if !annotations.contains_key(ANNOTATION_IGNORE) && !annotations.contains_key(ANNOTATION_OPERATION) {
            continue;
        }
        store
            .patch_entry_annotations(namespace, &entry.name_any(), &changes)
            .await?;
        cleared += 1;
    }
    debug!(namespace, cleared, "Cleared migration markers from DNS entries");
    Ok(cleared)
}

/// Wait until no matching entry carries a pending operation marker.
///
/// # Errors
///
/// Returns [`ActuatorError::Timeout`] after `timing.restore_pending_timeout`.
pub async fn wait_operations_settled(
    store: &dyn SeedStore,
    namespace: &str,
    selector: &Labels,
    timing: &Timing,
) -> Result<()> {
    let ticker = Ticker::with_timeout(timing.restore_poll_interval, timing.restore_pending_timeout);
    poll_until(
        ticker,
        &format!("pending operations on DNS entries in {namespace}"),
        move || async move {
            let pending = store
                .list_entries(namespace, selector)
                .await?
                .iter()
                .filter(|e| e.annotations().contains_key(ANNOTATION_OPERATION))
                .count();
            if pending > 0 {
                debug!(namespace, pending, "DNS entries still have pending operations");
            }
            Ok((pending == 0).then_some(()))
        },
    )
    .await
}

/// Create every snapshot entry that does not exist in the cluster.
///
/// Returns the number of entries created.
///
/// # Errors
///
/// Returns the first store error.
pub async fn resurrect_entries(store: &dyn SeedStore, state: &StateManager) -> Result<usize> {
    let namespace = state.namespace();
    let live: BTreeSet<String> = store
        .list_entries(namespace, &state.entry_selector())
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();

    let mut created = 0;
    for snapshot in state.entries().filter(|e| !live.contains(&e.name)) {
        if store.create_entry(namespace, &snapshot.to_entry(namespace)).await? {
            info!(namespace, entry = %snapshot.name, "Recreated DNS entry from persisted state");
            created += 1;
        }
    }
    Ok(created)
}

/// Strip finalizers from every matching entry so a forced deletion can finish.
///
/// # Errors
///
/// Returns the first store error.
pub async fn strip_entry_finalizers(store: &dyn SeedStore, namespace: &str, selector: &Labels) -> Result<usize> {
    let mut stripped = 0;
    for entry in store.list_entries(namespace, selector).await? {
        if entry.finalizers().is_empty() {
            continue;
        }
        store.remove_entry_finalizers(namespace, &entry.name_any()).await?;
        stripped += 1;
    }
    if stripped > 0 {
        warn!(namespace, stripped, "Removed finalizers from DNS entries");
    }
    Ok(stripped)
}

#[cfg(test)]
#[path = "entries_tests.rs"]
mod entries_tests;
