// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access to the control-plane (seed) resource store.
//!
//! [`SeedStore`] is the contract the lifecycle core needs from the declarative
//! resource store: typed get/list/create/patch/delete for the handful of kinds it
//! touches. [`KubeSeedStore`] implements it on top of a `kube::Client`; tests use
//! an in-memory implementation.
//!
//! Label selectors are passed as equality maps; every pair must match.

use crate::constants::SERVICE_NAME;
use crate::crd::{Cluster, DNSEntry, DNSProvider, DNSRecord, Extension, LastOperation};
use crate::reconcilers::pagination::list_all_paginated;
use crate::reconcilers::resources::{apply_resource, delete_if_exists};
use crate::reconcilers::retry::retry_api_call;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;

/// Equality label selector.
pub type Labels = BTreeMap<String, String>;

/// Resource-store operations used by the lifecycle core.
#[async_trait]
pub trait SeedStore: Send + Sync {
    /// Get an extension, `None` if it does not exist.
    async fn get_extension(&self, namespace: &str, name: &str) -> Result<Option<Extension>>;

    /// Get the cluster descriptor named after a control-plane namespace.
    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>>;

    /// Replace the persisted state on the extension status (`None` clears it).
    async fn persist_extension_state(
        &self,
        namespace: &str,
        name: &str,
        state: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Write the last operation on the extension status.
    async fn patch_last_operation(
        &self,
        namespace: &str,
        name: &str,
        operation: &LastOperation,
    ) -> Result<()>;

    /// Get a DNS entry, `None` if it does not exist.
    async fn get_entry(&self, namespace: &str, name: &str) -> Result<Option<DNSEntry>>;

    /// List DNS entries matching all labels.
    async fn list_entries(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSEntry>>;

    /// Create a DNS entry. Returns `false` if it already existed.
    async fn create_entry(&self, namespace: &str, entry: &DNSEntry) -> Result<bool>;

    /// Delete all DNS entries matching all labels.
    async fn delete_entries(&self, namespace: &str, labels: &Labels) -> Result<()>;

    /// Set (`Some`) or remove (`None`) annotations of a DNS entry.
    async fn patch_entry_annotations(
        &self,
        namespace: &str,
        name: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> Result<()>;

    /// Remove all finalizers of a DNS entry.
    async fn remove_entry_finalizers(&self, namespace: &str, name: &str) -> Result<()>;

    /// List DNS providers matching all labels.
    async fn list_providers(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSProvider>>;

    /// Get a DNS provider, `None` if it does not exist.
    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<DNSProvider>>;

    /// Create or update a DNS provider.
    async fn apply_provider(&self, provider: &DNSProvider) -> Result<()>;

    /// Delete a DNS provider; deleting a missing provider succeeds.
    async fn delete_provider(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a secret, `None` if it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Get a DNS record, `None` if it does not exist.
    async fn get_dns_record(&self, namespace: &str, name: &str) -> Result<Option<DNSRecord>>;
}

/// Render an equality selector in Kubernetes label selector syntax.
#[must_use]
pub fn selector_string(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `object_labels` contains every pair of `selector`.
#[must_use]
pub fn matches_labels(selector: &Labels, object_labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| object_labels.get(k).is_some_and(|actual| actual == v))
}

/// Top-level key of the legacy, uncompressed state form.
const LEGACY_STATE_KEY: &str = "entries";

/// Status merge patch that replaces `status.state` as a whole.
///
/// A merge patch keeps every key it does not name, so the legacy raw key is
/// nulled explicitly whenever the compressed envelope is written.
#[must_use]
pub fn state_patch(state: Option<serde_json::Value>) -> serde_json::Value {
    let state = match state {
        Some(serde_json::Value::Object(mut fields)) => {
            fields
                .entry(LEGACY_STATE_KEY)
                .or_insert(serde_json::Value::Null);
            serde_json::Value::Object(fields)
        }
        other => other.unwrap_or(serde_json::Value::Null),
    };
    json!({ "status": { "state": state } })
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// [`SeedStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSeedStore {
    client: Client,
}

impl KubeSeedStore {
    /// Wrap a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SeedStore for KubeSeedStore {
    async fn get_extension(&self, namespace: &str, name: &str) -> Result<Option<Extension>> {
        let api: Api<Extension> = self.namespaced(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get extension {namespace}/{name}")).await
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        retry_api_call(|| api.get_opt(name), &format!("get cluster {name}")).await
    }

    async fn persist_extension_state(
        &self,
        namespace: &str,
        name: &str,
        state: Option<serde_json::Value>,
    ) -> Result<()> {
        let api: Api<Extension> = self.namespaced(namespace);
        let patch = state_patch(state);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to persist DNS state on extension {namespace}/{name}"))?;
        Ok(())
    }

    async fn patch_last_operation(
        &self,
        namespace: &str,
        name: &str,
        operation: &LastOperation,
    ) -> Result<()> {
        let api: Api<Extension> = self.namespaced(namespace);
        let patch = json!({ "status": { "lastOperation": operation } });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to update last operation of {namespace}/{name}"))?;
        Ok(())
    }

    async fn get_entry(&self, namespace: &str, name: &str) -> Result<Option<DNSEntry>> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get DNS entry {namespace}/{name}")).await
    }

    async fn list_entries(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSEntry>> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        list_all_paginated(&api, ListParams::default().labels(&selector_string(labels))).await
    }

    async fn create_entry(&self, namespace: &str, entry: &DNSEntry) -> Result<bool> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        match api.create(&PostParams::default(), entry).await {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e).context("failed to create DNS entry"),
        }
    }

    async fn delete_entries(&self, namespace: &str, labels: &Labels) -> Result<()> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        api.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(&selector_string(labels)),
        )
        .await
        .with_context(|| format!("failed to delete DNS entries in {namespace}"))?;
        Ok(())
    }

    async fn patch_entry_annotations(
        &self,
        namespace: &str,
        name: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        let patch = json!({ "metadata": { "annotations": changes } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to annotate DNS entry {namespace}/{name}")),
        }
    }

    async fn remove_entry_finalizers(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<DNSEntry> = self.namespaced(namespace);
        let patch = json!({ "metadata": { "finalizers": null } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("failed to remove finalizers of DNS entry {namespace}/{name}")
            }),
        }
    }

    async fn list_providers(&self, namespace: &str, labels: &Labels) -> Result<Vec<DNSProvider>> {
        let api: Api<DNSProvider> = self.namespaced(namespace);
        list_all_paginated(&api, ListParams::default().labels(&selector_string(labels))).await
    }

    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<DNSProvider>> {
        let api: Api<DNSProvider> = self.namespaced(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get DNS provider {namespace}/{name}")).await
    }

    async fn apply_provider(&self, provider: &DNSProvider) -> Result<()> {
        apply_resource(&self.client, provider, SERVICE_NAME).await
    }

    async fn delete_provider(&self, namespace: &str, name: &str) -> Result<()> {
        delete_if_exists::<DNSProvider>(&self.client, namespace, name).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get secret {namespace}/{name}")).await
    }

    async fn get_dns_record(&self, namespace: &str, name: &str) -> Result<Option<DNSRecord>> {
        let api: Api<DNSRecord> = self.namespaced(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get DNS record {namespace}/{name}")).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
