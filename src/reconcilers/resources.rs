// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic apply and delete helpers for namespaced Kubernetes resources.
//!
//! Everything this service writes is owned by it, so updates use forced
//! server-side apply with the service as field manager. Deletion treats a
//! missing object as already deleted.
//!
//! # Example
//!
//! ```rust,no_run
//! use shoot_dns_service::reconcilers::resources::apply_resource;
//! use k8s_openapi::api::core::v1::Secret;
//! use kube::Client;
//! use anyhow::Result;
//!
//! async fn example(client: &Client, secret: Secret) -> Result<()> {
//!     apply_resource(client, &secret, "shoot-dns-service").await
//! }
//! ```

use anyhow::{Context as _, Result};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use tracing::{debug, info};

/// Create or update a namespaced resource with forced server-side apply.
///
/// The namespace is taken from the resource's metadata.
///
/// # Errors
///
/// Returns an error if the resource has no name or namespace, or if the apply fails.
pub async fn apply_resource<T>(client: &Client, resource: &T, field_manager: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + serde::de::DeserializeOwned,
{
    let meta = resource.meta();
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} must have a name", T::kind(&())))?;
    let namespace = meta
        .namespace
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} {name} must have a namespace", T::kind(&())))?;

    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    debug!(namespace, name, kind = %T::kind(&()), "Applying resource");

    api.patch(
        name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(resource),
    )
    .await
    .with_context(|| format!("failed to apply {} {namespace}/{name}", T::kind(&())))?;

    info!("Applied {} {}/{}", T::kind(&()), namespace, name);
    Ok(())
}

/// Delete a namespaced resource, succeeding if it does not exist.
///
/// Returns `true` if a deletion was issued.
///
/// # Errors
///
/// Returns an error for any API failure other than 404.
pub async fn delete_if_exists<T>(client: &Client, namespace: &str, name: &str) -> Result<bool>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted {} {}/{}", T::kind(&()), namespace, name);
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(namespace, name, kind = %T::kind(&()), "Resource already gone");
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("failed to delete {} {namespace}/{name}", T::kind(&()))),
    }
}
