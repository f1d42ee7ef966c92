// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory collaborators for tests.
//!
//! [`FakeSeedStore`] behaves like a small API server with a cooperative DNS
//! controller: applied providers become ready immediately (unless a state is
//! forced), and deleted entries disappear unless they carry finalizers.

use crate::bundle::ResourceBundleManager;
use crate::crd::{
    Cluster, ClusterSpec, DNSEntry, DNSEntrySpec, DNSEntryStatus, DNSProvider, DNSProviderStatus,
    DNSRecord, Extension, ExtensionSpec, ExtensionStatus, LastOperation,
};
use crate::errors::ActuatorError;
use crate::shoot_access::{ShootAccess, ShootCluster};
use crate::store::{matches_labels, Labels, SeedStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Mutable contents of a [`FakeSeedStore`].
#[derive(Default)]
pub struct FakeState {
    pub extensions: BTreeMap<Key, Extension>,
    pub clusters: BTreeMap<String, Cluster>,
    pub entries: BTreeMap<Key, DNSEntry>,
    pub providers: BTreeMap<Key, DNSProvider>,
    pub secrets: BTreeMap<Key, Secret>,
    pub dns_records: BTreeMap<Key, DNSRecord>,
    /// Provider state reported instead of `Ready`, by provider name.
    pub forced_provider_states: BTreeMap<String, String>,
    /// Providers whose status is never updated.
    pub frozen_providers: Vec<String>,
    pub last_operations: Vec<LastOperation>,
    pub persist_calls: usize,
    pub fail_persist: bool,
    pub provider_applies: usize,
    pub provider_deletes: Vec<String>,
}

/// In-memory [`SeedStore`].
#[derive(Default)]
pub struct FakeSeedStore {
    pub state: Mutex<FakeState>,
}

impl FakeSeedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_extension(&self, extension: Extension) {
        let k = key(&extension.namespace().unwrap_or_default(), &extension.name_any());
        self.with(|s| s.extensions.insert(k, extension));
    }

    pub fn insert_cluster(&self, cluster: Cluster) {
        self.with(|s| s.clusters.insert(cluster.name_any(), cluster));
    }

    pub fn insert_entry(&self, entry: DNSEntry) {
        let k = key(&entry.namespace().unwrap_or_default(), &entry.name_any());
        self.with(|s| s.entries.insert(k, entry));
    }

    pub fn remove_entry(&self, namespace: &str, name: &str) {
        self.with(|s| s.entries.remove(&key(namespace, name)));
    }

    pub fn insert_provider(&self, provider: DNSProvider) {
        let k = key(&provider.namespace().unwrap_or_default(), &provider.name_any());
        self.with(|s| s.providers.insert(k, provider));
    }

    pub fn insert_secret(&self, namespace: &str, name: &str) {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret.data = Some(BTreeMap::from([(
            "token".to_string(),
            ByteString(b"secret".to_vec()),
        )]));
        self.with(|s| s.secrets.insert(key(namespace, name), secret));
    }

    pub fn insert_raw_secret(&self, secret: Secret) {
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        self.with(|s| s.secrets.insert(k, secret));
    }

    pub fn insert_dns_record(&self, record: DNSRecord) {
        let k = key(&record.namespace().unwrap_or_default(), &record.name_any());
        self.with(|s| s.dns_records.insert(k, record));
    }

    pub fn extension(&self, namespace: &str, name: &str) -> Option<Extension> {
        self.with(|s| s.extensions.get(&key(namespace, name)).cloned())
    }

    pub fn entry_names(&self, namespace: &str) -> Vec<String> {
        self.with(|s| {
            s.entries
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, n)| n.clone())
                .collect()
        })
    }

    pub fn entry(&self, namespace: &str, name: &str) -> Option<DNSEntry> {
        self.with(|s| s.entries.get(&key(namespace, name)).cloned())
    }

    pub fn provider_names(&self, namespace: &str) -> Vec<String> {
        self.with(|s| {
            s.providers
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, n)| n.clone())
                .collect()
        })
    }

    pub fn provider(&self, namespace: &str, name: &str) -> Option<DNSProvider> {
        self.with(|s| s.providers.get(&key(namespace, name)).cloned())
    }
}

#[async_trait]
impl SeedStore for FakeSeedStore {
    async fn get_extension(&self, namespace: &str, name: &str) -> Result<Option<Extension>> {
        Ok(self.extension(namespace, name))
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self.with(|s| s.clusters.get(name).cloned()))
    }

    async fn persist_extension_state(
        &self,
        namespace: &str,
        name: &str,
        state: Option<serde_json::Value>,
    ) -> Result<()> {
        self.with(|s| {
            if s.fail_persist {
                return Err(anyhow!("injected persist failure"));
            }
            let extension = s
                .extensions
                .get_mut(&key(namespace, name))
                .ok_or_else(|| anyhow!("extension {namespace}/{name} not found"))?;
            extension.status.get_or_insert_with(ExtensionStatus::default).state = state;
            s.persist_calls += 1;
            Ok(())
        })
    }

    async fn patch_last_operation(
        &self,
        namespace: &str,
        name: &str,
        operation: &LastOperation,
    ) -> Result<()> {
        self.with(|s| {
            if let Some(extension) = s.extensions.get_mut(&key(namespace, name)) {
                extension
                    .status
                    .get_or_insert_with(ExtensionStatus::default)
                    .last_operation = Some(operation.clone());
            }
            s.last_operations.push(operation.clone());
        });
        Ok(())
    }

    async fn get_entry(&self, namespace: &str, name: &str) -> Result<Option<DNSEntry>> {
        Ok(self.entry(namespace, name))
    }

    async fn list_entries(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSEntry>> {
        Ok(self.with(|s| {
            s.entries
                .iter()
                .filter(|((ns, _), e)| ns == namespace && matches_labels(labels, e.labels()))
                .map(|(_, e)| e.clone())
                .collect()
        }))
    }

    async fn create_entry(&self, namespace: &str, entry: &DNSEntry) -> Result<bool> {
        let k = key(namespace, &entry.name_any());
        Ok(self.with(|s| {
            if s.entries.contains_key(&k) {
                return false;
            }
            let mut created = entry.clone();
            created.metadata.namespace = Some(namespace.to_string());
            s.entries.insert(k, created);
            true
        }))
    }

    async fn delete_entries(&self, namespace: &str, labels: &Labels) -> Result<()> {
        self.with(|s| {
            let matching: Vec<Key> = s
                .entries
                .iter()
                .filter(|((ns, _), e)| ns == namespace && matches_labels(labels, e.labels()))
                .map(|(k, _)| k.clone())
                .collect();
            for k in matching {
                let blocked = s.entries.get(&k).is_some_and(|e| !e.finalizers().is_empty());
                if blocked {
                    if let Some(e) = s.entries.get_mut(&k) {
                        e.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
                    }
                } else {
                    s.entries.remove(&k);
                }
            }
        });
        Ok(())
    }

    async fn patch_entry_annotations(
        &self,
        namespace: &str,
        name: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        self.with(|s| {
            if let Some(entry) = s.entries.get_mut(&key(namespace, name)) {
                let annotations = entry.metadata.annotations.get_or_insert_with(BTreeMap::new);
                for (k, v) in changes {
                    match v {
                        Some(v) => {
                            annotations.insert(k.clone(), v.clone());
                        }
                        None => {
                            annotations.remove(k);
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn remove_entry_finalizers(&self, namespace: &str, name: &str) -> Result<()> {
        self.with(|s| {
            let k = key(namespace, name);
            let deleting = match s.entries.get_mut(&k) {
                Some(entry) => {
                    entry.metadata.finalizers = None;
                    entry.metadata.deletion_timestamp.is_some()
                }
                None => false,
            };
            if deleting {
                s.entries.remove(&k);
            }
        });
        Ok(())
    }

    async fn list_providers(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSProvider>> {
        Ok(self.with(|s| {
            s.providers
                .iter()
                .filter(|((ns, _), p)| ns == namespace && matches_labels(labels, p.labels()))
                .map(|(_, p)| p.clone())
                .collect()
        }))
    }

    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<DNSProvider>> {
        Ok(self.provider(namespace, name))
    }

    async fn apply_provider(&self, provider: &DNSProvider) -> Result<()> {
        let namespace = provider.namespace().unwrap_or_default();
        let name = provider.name_any();
        self.with(|s| {
            s.provider_applies += 1;
            let k = key(&namespace, &name);
            let generation = match s.providers.get(&k) {
                Some(existing) if existing.spec == provider.spec => {
                    existing.metadata.generation.unwrap_or(1)
                }
                Some(existing) => existing.metadata.generation.unwrap_or(1) + 1,
                None => 1,
            };
            let previous_status = s.providers.get(&k).and_then(|p| p.status.clone());

            let mut stored = provider.clone();
            stored.metadata.generation = Some(generation);
            stored.status = if s.frozen_providers.contains(&name) {
                previous_status
            } else {
                Some(DNSProviderStatus {
                    state: Some(
                        s.forced_provider_states
                            .get(&name)
                            .cloned()
                            .unwrap_or_else(|| "Ready".to_string()),
                    ),
                    message: None,
                    observed_generation: Some(generation),
                })
            };
            s.providers.insert(k, stored);
        });
        Ok(())
    }

    async fn delete_provider(&self, namespace: &str, name: &str) -> Result<()> {
        self.with(|s| {
            if s.providers.remove(&key(namespace, name)).is_some() {
                s.provider_deletes.push(name.to_string());
            }
        });
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.with(|s| s.secrets.get(&key(namespace, name)).cloned()))
    }

    async fn get_dns_record(&self, namespace: &str, name: &str) -> Result<Option<DNSRecord>> {
        Ok(self.with(|s| s.dns_records.get(&key(namespace, name)).cloned()))
    }
}

/// A bundle as recorded by [`FakeBundles`].
#[derive(Clone, Debug, PartialEq)]
pub struct FakeBundle {
    pub class: Option<String>,
    pub template: String,
    pub values: serde_json::Value,
    pub labels: BTreeMap<String, String>,
    pub keep_objects: bool,
}

/// In-memory [`ResourceBundleManager`].
#[derive(Default)]
pub struct FakeBundles {
    pub bundles: Mutex<BTreeMap<Key, FakeBundle>>,
    pub deleted: Mutex<Vec<String>>,
    /// Bundles whose deletion never completes.
    pub stuck: Mutex<Vec<String>>,
}

impl FakeBundles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<FakeBundle> {
        self.bundles.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn insert(&self, namespace: &str, name: &str, bundle: FakeBundle) {
        self.bundles.lock().unwrap().insert(key(namespace, name), bundle);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceBundleManager for FakeBundles {
    async fn create_or_update(
        &self,
        namespace: &str,
        name: &str,
        class: Option<&str>,
        template: &str,
        values: &serde_json::Value,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut bundles = self.bundles.lock().unwrap();
        let keep_objects = bundles
            .get(&key(namespace, name))
            .is_some_and(|b| b.keep_objects);
        bundles.insert(
            key(namespace, name),
            FakeBundle {
                class: class.map(str::to_string),
                template: template.to_string(),
                values: values.clone(),
                labels: labels.clone(),
                keep_objects,
            },
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if self.stuck.lock().unwrap().iter().any(|s| s == name) {
            return Ok(());
        }
        if self.bundles.lock().unwrap().remove(&key(namespace, name)).is_some() {
            self.deleted.lock().unwrap().push(name.to_string());
        }
        Ok(())
    }

    async fn wait_until_deleted(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        if self.bundles.lock().unwrap().contains_key(&key(namespace, name)) {
            tokio::time::sleep(timeout).await;
            return Err(ActuatorError::Timeout {
                what: format!("resource bundle {namespace}/{name} to be deleted"),
                waited: timeout,
            }
            .into());
        }
        Ok(())
    }

    async fn set_keep_objects(&self, namespace: &str, name: &str, keep: bool) -> Result<()> {
        if let Some(bundle) = self.bundles.lock().unwrap().get_mut(&key(namespace, name)) {
            bundle.keep_objects = keep;
        }
        Ok(())
    }
}

/// In-memory [`ShootAccess`] counting cleanup calls.
#[derive(Default)]
pub struct FakeShootAccess {
    pub strip_calls: Arc<AtomicUsize>,
    pub crd_deletes: Arc<AtomicUsize>,
}

impl FakeShootAccess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn strip_calls(&self) -> usize {
        self.strip_calls.load(Ordering::SeqCst)
    }

    pub fn crd_deletes(&self) -> usize {
        self.crd_deletes.load(Ordering::SeqCst)
    }
}

struct FakeShootCluster {
    strip_calls: Arc<AtomicUsize>,
    crd_deletes: Arc<AtomicUsize>,
}

#[async_trait]
impl ShootAccess for FakeShootAccess {
    async fn client(&self, _namespace: &str) -> Result<Arc<dyn ShootCluster>> {
        Ok(Arc::new(FakeShootCluster {
            strip_calls: Arc::clone(&self.strip_calls),
            crd_deletes: Arc::clone(&self.crd_deletes),
        }))
    }
}

#[async_trait]
impl ShootCluster for FakeShootCluster {
    async fn strip_dns_finalizers(&self) -> Result<usize> {
        self.strip_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn delete_dns_crds(&self) -> Result<()> {
        self.crd_deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub const NAMESPACE: &str = "shoot--dev--app";
pub const EXTENSION_NAME: &str = "shoot-dns-service";
pub const SHOOT_ID: &str = "shoot--dev--app";

/// A DNS entry of the fixture tenant.
pub fn entry(name: &str, dns_name: &str) -> DNSEntry {
    let mut entry = DNSEntry::new(
        name,
        DNSEntrySpec {
            dns_name: dns_name.to_string(),
            targets: Some(vec!["10.0.0.1".to_string()]),
            ttl: Some(120),
            ..Default::default()
        },
    );
    entry.metadata.namespace = Some(NAMESPACE.to_string());
    entry.metadata.labels = Some(BTreeMap::from([(
        crate::labels::LABEL_SHOOT_ID.to_string(),
        SHOOT_ID.to_string(),
    )]));
    entry
}

/// A DNS entry with a reported status.
pub fn entry_with_status(name: &str, provider: &str, state: &str, message: &str) -> DNSEntry {
    let mut e = entry(name, &format!("{name}.example.com"));
    e.status = Some(DNSEntryStatus {
        state: Some(state.to_string()),
        message: Some(message.to_string()),
        provider: Some(provider.to_string()),
        ..Default::default()
    });
    e
}

/// The fixture extension with an optional provider config.
pub fn extension(provider_config: Option<serde_json::Value>) -> Extension {
    let mut extension = Extension::new(
        EXTENSION_NAME,
        ExtensionSpec {
            type_: crate::constants::EXTENSION_TYPE.to_string(),
            provider_config,
        },
    );
    extension.metadata.namespace = Some(NAMESPACE.to_string());
    extension.metadata.generation = Some(1);
    extension
}

/// The fixture cluster with a domain, optional hibernation and resource references.
pub fn cluster(domain: Option<&str>, hibernated: bool) -> Cluster {
    let shoot = json!({
        "metadata": { "name": "app", "namespace": "garden-dev" },
        "spec": {
            "dns": domain.map(|d| json!({ "domain": d })),
            "hibernation": { "enabled": hibernated },
            "resources": [
                { "name": "my-dns", "resourceRef": { "kind": "Secret", "name": "dns-credentials", "apiVersion": "v1" } }
            ]
        },
        "status": { "technicalID": NAMESPACE, "clusterIdentity": SHOOT_ID }
    });
    Cluster::new(
        NAMESPACE,
        ClusterSpec {
            shoot,
            seed: None,
            cloud_profile: None,
        },
    )
}
