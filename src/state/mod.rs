// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-tenant DNS entry state.
//!
//! The snapshot held by [`StateManager`] is the only record of a tenant's DNS
//! entries that survives a control-plane migration. It lives compressed in the
//! extension status (see [`codec`]) and is kept in sync with the live entries of
//! the tenant's control-plane namespace, selected by the `shoot-id` label.
//!
//! Mutations only set a dirty flag; [`StateManager::update`] writes the snapshot
//! back when something changed. A failed write keeps the flag so the next pass
//! retries.

pub mod codec;
pub mod lock;

use crate::crd::{DNSEntry, DNSEntrySpec, Extension};
use crate::labels::{is_transient_annotation, ANNOTATION_IGNORE, ANNOTATION_OPERATION, LABEL_SHOOT_ID};
use crate::metrics;
use crate::store::{Labels, SeedStore};
use anyhow::{Context as _, Result};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Captured form of one DNS entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryState {
    /// Entry name, unique within a snapshot.
    pub name: String,
    /// Entry labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Entry annotations, minus transient ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Entry spec.
    pub spec: DNSEntrySpec,
}

impl EntryState {
    /// Capture a live entry.
    #[must_use]
    pub fn from_entry(entry: &DNSEntry) -> Self {
        Self {
            name: entry.name_any(),
            labels: entry.labels().clone(),
            annotations: entry
                .annotations()
                .iter()
                .filter(|(k, _)| !is_transient_annotation(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            spec: entry.spec.clone(),
        }
    }

    /// Rebuild a live entry for `namespace`.
    ///
    /// Markers left over from a migration (ignore and pending operation) are not
    /// carried over, so the DNS controller picks the entry up right away.
    #[must_use]
    pub fn to_entry(&self, namespace: &str) -> DNSEntry {
        let mut entry = DNSEntry::new(&self.name, self.spec.clone());
        entry.metadata.namespace = Some(namespace.to_string());
        entry.metadata.labels = (!self.labels.is_empty()).then(|| self.labels.clone());

        let annotations: BTreeMap<String, String> = self
            .annotations
            .iter()
            .filter(|(k, _)| k.as_str() != ANNOTATION_IGNORE && k.as_str() != ANNOTATION_OPERATION)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entry.metadata.annotations = (!annotations.is_empty()).then_some(annotations);
        entry
    }
}

/// Wire form of the snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DNSState {
    /// Captured entries, ordered by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryState>,
}

impl DNSState {
    /// Decode a persisted status value, compressed or legacy raw.
    ///
    /// Returns `None` when nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be decoded.
    pub fn from_persisted(value: &serde_json::Value) -> Result<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        let bytes = serde_json::to_vec(value).context("failed to serialize persisted state")?;
        let raw = if codec::looks_like_compressed(&bytes) {
            match codec::decompress(&bytes)? {
                Some(raw) => raw,
                None => return Ok(None),
            }
        } else {
            bytes
        };
        let state = serde_json::from_slice(&raw).context("failed to decode DNS entry state")?;
        Ok(Some(state))
    }

    /// Encode for persistence; `None` when there is nothing to keep.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or compression fails.
    pub fn to_persisted(&self) -> Result<Option<serde_json::Value>> {
        let raw = serde_json::to_vec(self).context("failed to encode DNS entry state")?;
        match codec::compress(&raw)? {
            Some(envelope) => Ok(Some(
                serde_json::from_slice(&envelope).context("invalid compressed state envelope")?,
            )),
            None => Ok(None),
        }
    }
}

/// How [`StateManager::refresh`] treats snapshot entries that are not live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// The snapshot ends up holding exactly the live entries.
    Exact,
    /// Live entries are upserted and missing ones kept. Used while the
    /// tenant's entries are drained on purpose (hibernation).
    KeepMissing,
}

/// State synchronizer for one tenant.
pub struct StateManager {
    store: Arc<dyn SeedStore>,
    namespace: String,
    extension_name: String,
    shoot_id: String,
    entries: BTreeMap<String, EntryState>,
    dirty: bool,
}

impl StateManager {
    /// Create an empty, clean synchronizer.
    ///
    /// `shoot_id` is the value of the tenant label selecting its entries.
    pub fn new(
        store: Arc<dyn SeedStore>,
        namespace: impl Into<String>,
        extension_name: impl Into<String>,
        shoot_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            extension_name: extension_name.into(),
            shoot_id: shoot_id.into(),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Label selector of the tenant's entries.
    #[must_use]
    pub fn entry_selector(&self) -> Labels {
        Labels::from([(LABEL_SHOOT_ID.to_string(), self.shoot_id.clone())])
    }

    /// Control-plane namespace of the tenant.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether the snapshot has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Captured entries, ordered by name.
    pub fn entries(&self) -> impl Iterator<Item = &EntryState> {
        self.entries.values()
    }

    /// Captured entry by name.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&EntryState> {
        self.entries.get(name)
    }

    /// Number of captured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the persisted snapshot of `extension`.
    ///
    /// Undecodable state is discarded and the snapshot marked dirty, so the next
    /// refresh rebuilds it from the live entries.
    pub fn load(&mut self, extension: &Extension) {
        self.entries.clear();
        self.dirty = false;

        let Some(persisted) = extension.status.as_ref().and_then(|s| s.state.as_ref()) else {
            return;
        };
        match DNSState::from_persisted(persisted) {
            Ok(Some(state)) => {
                for entry in state.entries {
                    self.entries.insert(entry.name.clone(), entry);
                }
                debug!(namespace = %self.namespace, entries = self.entries.len(), "Loaded DNS entry state");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(namespace = %self.namespace, error = %format!("{e:#}"), "Discarding undecodable DNS entry state");
                self.dirty = true;
            }
        }
    }

    /// Reconcile the snapshot with the live entries of the tenant.
    ///
    /// Returns whether the snapshot changed.
    ///
    /// # Errors
    ///
    /// Returns an error if listing the entries fails.
    pub async fn refresh(&mut self, mode: RefreshMode) -> Result<bool> {
        let live = self
            .store
            .list_entries(&self.namespace, &self.entry_selector())
            .await?;
        Ok(match mode {
            RefreshMode::Exact => self.ensure_entries(&live),
            RefreshMode::KeepMissing => live
                .iter()
                .fold(false, |changed, entry| self.ensure_entry_for(entry) | changed),
        })
    }

    /// Make the snapshot hold exactly the given live entries.
    ///
    /// Returns whether anything changed. The result does not depend on the order
    /// of `live`, and a second call with the same entries reports no change.
    pub fn ensure_entries(&mut self, live: &[DNSEntry]) -> bool {
        let mut changed = false;
        for entry in live {
            changed |= self.ensure_entry_for(entry);
        }

        let names: std::collections::HashSet<String> = live.iter().map(ResourceExt::name_any).collect();
        let before = self.entries.len();
        self.entries.retain(|name, _| names.contains(name));
        if self.entries.len() != before {
            self.dirty = true;
            changed = true;
        }
        changed
    }

    /// Upsert a single live entry. Returns whether the snapshot changed.
    pub fn ensure_entry_for(&mut self, entry: &DNSEntry) -> bool {
        let captured = EntryState::from_entry(entry);
        if self.entries.get(&captured.name) == Some(&captured) {
            return false;
        }
        self.entries.insert(captured.name.clone(), captured);
        self.dirty = true;
        true
    }

    /// Remove a single entry. Returns whether the snapshot changed.
    pub fn ensure_entry_deleted(&mut self, name: &str) -> bool {
        if self.entries.remove(name).is_some() {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Forget all entries.
    pub fn drop_all_entries(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    /// Persist the snapshot if it is dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or persisting fails; the snapshot stays dirty.
    pub async fn update(&mut self, reason: &str) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let state = DNSState {
            entries: self.entries.values().cloned().collect(),
        };
        let persisted = state.to_persisted()?;
        let size = persisted
            .as_ref()
            .map_or(0, |v| v.to_string().len());

        self.store
            .persist_extension_state(&self.namespace, &self.extension_name, persisted)
            .await
            .with_context(|| format!("failed to persist DNS entry state ({reason})"))?;

        metrics::record_persisted_state_size(&self.namespace, size);
        info!(
            namespace = %self.namespace,
            entries = self.entries.len(),
            bytes = size,
            reason,
            "Persisted DNS entry state"
        );
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
