// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Replication of DNS entry changes into the persisted snapshot.
//!
//! A watch on all tenant-labelled `DNSEntry` objects feeds every change into the
//! tenant's [`StateManager`] one entry at a time, so the snapshot follows the
//! live entries between actuator passes.
//!
//! Events only name the entry. The handler re-reads it under the tenant key and
//! records what it finds, which makes late or duplicated events harmless.
//!
//! When the tenant key is held by the actuator, the event is requeued after a
//! short jitter instead of waiting for the key.

use crate::constants::{
    EXTENSION_NAME, LOCK_JITTER_MAX_MILLIS, LOCK_JITTER_MIN_MILLIS, REPLICATION_CONCURRENCY,
    REPLICATION_LOCK_ATTEMPTS,
};
use crate::crd::DNSEntry;
use crate::labels::LABEL_SHOOT_ID;
use crate::metrics;
use crate::reconcilers::actuator::ExtensionContext;
use crate::reconcilers::retry::jitter;
use crate::state::lock::NamedLocks;
use crate::state::StateManager;
use crate::store::SeedStore;
use anyhow::Result;
use futures::TryStreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of handling one entry change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The snapshot was changed and persisted
    Updated,
    /// The snapshot already matched the entry
    Unchanged,
    /// The entry is not replicated (no tenant, wrong tenant, tenant going away)
    Skipped,
    /// The tenant key is busy; try again after the delay
    Requeue(Duration),
}

/// Watch-driven reconciler mirroring entry changes into tenant snapshots.
pub struct ReplicationReconciler {
    store: Arc<dyn SeedStore>,
    locks: Arc<NamedLocks>,
}

impl ReplicationReconciler {
    /// Create a reconciler. `locks` must be shared with the actuator.
    #[must_use]
    pub fn new(store: Arc<dyn SeedStore>, locks: Arc<NamedLocks>) -> Self {
        Self { store, locks }
    }

    /// Record the current state of entry `namespace/name` in its tenant's snapshot.
    ///
    /// A live entry is upserted. A missing or deleting entry is removed, except
    /// while the tenant is hibernated or being deleted: the entries are drained
    /// then and the snapshot must keep them.
    ///
    /// # Errors
    ///
    /// Returns store failures or a failure to persist the snapshot.
    pub async fn sync_entry(&self, namespace: &str, name: &str) -> Result<SyncOutcome> {
        let Some(_guard) = self.locks.try_lock(namespace) else {
            metrics::record_lock_contention("replication");
            let delay = jitter(
                Duration::from_millis(LOCK_JITTER_MIN_MILLIS),
                Duration::from_millis(LOCK_JITTER_MAX_MILLIS),
            );
            debug!(namespace, entry = name, delay_ms = delay.as_millis(), "Tenant state locked, requeueing");
            return Ok(SyncOutcome::Requeue(delay));
        };

        let Some(extension) = self.store.get_extension(namespace, EXTENSION_NAME).await? else {
            return Ok(SyncOutcome::Skipped);
        };
        let ctx = ExtensionContext::load(self.store.as_ref(), &extension).await?;

        let live = self
            .store
            .get_entry(namespace, name)
            .await?
            .filter(|e| e.labels().get(LABEL_SHOOT_ID) == Some(&ctx.shoot_id));

        let mut state = StateManager::new(
            Arc::clone(&self.store),
            namespace,
            EXTENSION_NAME,
            ctx.shoot_id.clone(),
        );
        state.load(&extension);

        let changed = match live {
            Some(entry) if entry.metadata.deletion_timestamp.is_none() => {
                metrics::record_replication_event("apply");
                state.ensure_entry_for(&entry)
            }
            _ => {
                let draining = ctx.shoot.hibernated
                    || ctx.shoot.deleting
                    || extension.metadata.deletion_timestamp.is_some();
                if draining {
                    metrics::record_replication_event("skipped");
                    return Ok(SyncOutcome::Skipped);
                }
                metrics::record_replication_event("delete");
                state.ensure_entry_deleted(name)
            }
        };

        if !changed {
            return Ok(SyncOutcome::Unchanged);
        }
        state.update("replication").await?;
        Ok(SyncOutcome::Updated)
    }

    /// Handle one entry change, requeueing while the tenant key is busy.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempt, or a lock error once the
    /// attempts are spent.
    pub async fn sync_with_requeue(&self, namespace: &str, name: &str) -> Result<SyncOutcome> {
        for _ in 0..REPLICATION_LOCK_ATTEMPTS {
            match self.sync_entry(namespace, name).await? {
                SyncOutcome::Requeue(delay) => tokio::time::sleep(delay).await,
                outcome => return Ok(outcome),
            }
        }
        Err(crate::errors::ActuatorError::LockBusy(namespace.to_string()).into())
    }

    /// Watch tenant-labelled DNS entries until the watch stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch stream fails terminally.
    pub async fn run(self: Arc<Self>, api: Api<DNSEntry>) -> Result<()> {
        info!("Starting DNS entry replication");
        let config = watcher::Config::default().labels(LABEL_SHOOT_ID);

        watcher(api, config)
            .default_backoff()
            .try_filter_map(|event| async move { Ok(changed_entry(event)) })
            .map_err(anyhow::Error::from)
            .try_for_each_concurrent(REPLICATION_CONCURRENCY, |(namespace, name)| {
                let this = Arc::clone(&self);
                async move {
                    match this.sync_with_requeue(&namespace, &name).await {
                        Ok(outcome) => debug!(namespace = %namespace, entry = %name, ?outcome, "Replicated DNS entry"),
                        Err(e) => warn!(namespace = %namespace, entry = %name, error = %format!("{e:#}"), "Failed to replicate DNS entry"),
                    }
                    Ok(())
                }
            })
            .await
    }
}

/// Namespace and name of the entry a watch event is about.
fn changed_entry(event: watcher::Event<DNSEntry>) -> Option<(String, String)> {
    match event {
        watcher::Event::Apply(entry) | watcher::Event::Delete(entry) | watcher::Event::InitApply(entry) => {
            Some((entry.namespace()?, entry.name_any()))
        }
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

#[cfg(test)]
#[path = "replication_tests.rs"]
mod replication_tests;
