// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer and annotation management for namespaced resources.
//!
//! The service keeps its finalizer on every `Extension` it reconciles, so a
//! deletion always reaches the actuator before the object disappears.
//!
//! # Example
//!
//! ```rust,no_run
//! use shoot_dns_service::crd::Extension;
//! use shoot_dns_service::labels::FINALIZER_EXTENSION;
//! use shoot_dns_service::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
//! use kube::Client;
//! use anyhow::Result;
//!
//! async fn example(client: &Client, extension: &Extension) -> Result<()> {
//!     ensure_finalizer(client, extension, FINALIZER_EXTENSION).await?;
//!     // ... teardown ...
//!     remove_finalizer(client, extension, FINALIZER_EXTENSION).await
//! }
//! ```

use anyhow::{Context as _, Result};
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Whether `resource` carries `finalizer`.
#[must_use]
pub fn has_finalizer<T: ResourceExt>(resource: &T, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Finalizer list of `resource` with `finalizer` appended, `None` if already present.
#[must_use]
pub fn with_finalizer<T: ResourceExt>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizer list of `resource` without `finalizer`, `None` if it was absent.
#[must_use]
pub fn without_finalizer<T: ResourceExt>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(resource, finalizer) {
        return None;
    }
    Some(
        resource
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect(),
    )
}

async fn patch_metadata<T>(client: &Client, resource: &T, patch: serde_json::Value) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("failed to patch {} {namespace}/{name}", T::kind(&())))?;
    Ok(())
}

/// Add `finalizer` to `resource` unless present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let Some(finalizers) = with_finalizer(resource, finalizer) else {
        return Ok(());
    };
    info!(
        kind = %T::kind(&()),
        namespace = ?resource.namespace(),
        name = %resource.name_any(),
        finalizer,
        "Adding finalizer"
    );
    patch_metadata(client, resource, json!({ "metadata": { "finalizers": finalizers } })).await
}

/// Remove `finalizer` from `resource` if present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn remove_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let Some(finalizers) = without_finalizer(resource, finalizer) else {
        return Ok(());
    };
    info!(
        kind = %T::kind(&()),
        namespace = ?resource.namespace(),
        name = %resource.name_any(),
        finalizer,
        "Removing finalizer"
    );
    patch_metadata(client, resource, json!({ "metadata": { "finalizers": finalizers } })).await
}

/// Remove annotation `key` from `resource` if present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn remove_annotation<T>(client: &Client, resource: &T, key: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    if !resource.annotations().contains_key(key) {
        return Ok(());
    }
    patch_metadata(client, resource, json!({ "metadata": { "annotations": { key: null } } })).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
