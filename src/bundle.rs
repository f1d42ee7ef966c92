// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource bundles: named sets of rendered objects applied and deleted as a unit.
//!
//! The lifecycle core only needs [`ResourceBundleManager`]. [`KubeBundleManager`]
//! stores the template name and values in a `Secret` and points a
//! `ManagedResource` at it; the resource manager of the control plane renders
//! and applies the content to the target cluster.

use crate::constants::SERVICE_NAME;
use crate::crd::{LocalObjectReference, ManagedResource, ManagedResourceSpec};
use crate::labels::{K8S_MANAGED_BY, LABEL_BUNDLE_ORIGIN, MANAGED_BY_SHOOT_DNS_SERVICE};
use crate::reconcilers::resources::{apply_resource, delete_if_exists};
use crate::reconcilers::retry::{poll_until, retry_api_call, Ticker};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Data key of the rendered values inside the bundle secret.
pub const VALUES_KEY: &str = "values.yaml";

/// Data key of the template name inside the bundle secret.
pub const TEMPLATE_KEY: &str = "template";

/// Lifecycle of templated multi-object bundles.
#[async_trait]
pub trait ResourceBundleManager: Send + Sync {
    /// Create the bundle or update its content.
    ///
    /// `class` selects the resource manager responsible; `None` targets the
    /// tenant cluster.
    async fn create_or_update(
        &self,
        namespace: &str,
        name: &str,
        class: Option<&str>,
        template: &str,
        values: &serde_json::Value,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Request deletion of the bundle. Deleting a missing bundle succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Wait until the bundle is gone, at most `timeout`.
    async fn wait_until_deleted(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;

    /// Keep (or stop keeping) the bundle's objects when the bundle is deleted.
    async fn set_keep_objects(&self, namespace: &str, name: &str, keep: bool) -> Result<()>;
}

/// Name of the secret holding a bundle's content.
#[must_use]
pub fn bundle_secret_name(bundle: &str) -> String {
    format!("managedresource-{bundle}")
}

/// Build the content secret of a bundle.
///
/// # Errors
///
/// Returns an error if the values cannot be rendered as YAML.
pub fn build_bundle_secret(
    namespace: &str,
    name: &str,
    template: &str,
    values: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> Result<Secret> {
    let rendered = serde_yaml::to_string(values)
        .with_context(|| format!("failed to render values of bundle {namespace}/{name}"))?;

    let mut data = BTreeMap::new();
    data.insert(TEMPLATE_KEY.to_string(), template.to_string());
    data.insert(VALUES_KEY.to_string(), rendered);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(bundle_secret_name(name)),
            namespace: Some(namespace.to_string()),
            labels: Some(bundle_labels(name, labels)),
            ..Default::default()
        },
        string_data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

/// Build the `ManagedResource` of a bundle.
#[must_use]
pub fn build_managed_resource(
    namespace: &str,
    name: &str,
    class: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> ManagedResource {
    let mut resource = ManagedResource::new(
        name,
        ManagedResourceSpec {
            class: class.map(str::to_string),
            secret_refs: vec![LocalObjectReference {
                name: bundle_secret_name(name),
            }],
            keep_objects: None,
            inject_labels: (!labels.is_empty()).then(|| labels.clone()),
        },
    );
    resource.metadata.namespace = Some(namespace.to_string());
    resource.metadata.labels = Some(bundle_labels(name, labels));
    resource
}

fn bundle_labels(name: &str, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = extra.clone();
    labels.insert(
        K8S_MANAGED_BY.to_string(),
        MANAGED_BY_SHOOT_DNS_SERVICE.to_string(),
    );
    labels.insert(LABEL_BUNDLE_ORIGIN.to_string(), name.to_string());
    labels
}

/// [`ResourceBundleManager`] backed by `ManagedResource` objects.
#[derive(Clone)]
pub struct KubeBundleManager {
    client: Client,
    poll_interval: Duration,
}

impl KubeBundleManager {
    /// Create a manager polling deletions every `poll_interval`.
    #[must_use]
    pub fn new(client: Client, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }
}

#[async_trait]
impl ResourceBundleManager for KubeBundleManager {
    async fn create_or_update(
        &self,
        namespace: &str,
        name: &str,
        class: Option<&str>,
        template: &str,
        values: &serde_json::Value,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let secret = build_bundle_secret(namespace, name, template, values, labels)?;
        apply_resource(&self.client, &secret, SERVICE_NAME).await?;

        let resource = build_managed_resource(namespace, name, class, labels);
        apply_resource(&self.client, &resource, SERVICE_NAME).await?;

        info!(namespace, bundle = name, template, "Deployed resource bundle");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        delete_if_exists::<ManagedResource>(&self.client, namespace, name).await?;
        delete_if_exists::<Secret>(&self.client, namespace, &bundle_secret_name(name)).await?;
        Ok(())
    }

    async fn wait_until_deleted(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let api: Api<ManagedResource> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("resource bundle {namespace}/{name} to be deleted");
        let api = &api;
        poll_until(Ticker::with_timeout(self.poll_interval, timeout), &what, move || async move {
            let current = retry_api_call(|| api.get_opt(name), &format!("get bundle {name}")).await?;
            if current.is_some() {
                debug!(namespace, bundle = name, "Resource bundle still present");
            }
            Ok(current.is_none().then_some(()))
        })
        .await
    }

    async fn set_keep_objects(&self, namespace: &str, name: &str, keep: bool) -> Result<()> {
        let api: Api<ManagedResource> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "keepObjects": keep } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, bundle = name, "Bundle absent, nothing to keep");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("failed to set keepObjects={keep} on bundle {namespace}/{name}")
            }),
        }
    }
}

#[cfg(test)]
#[path = "bundle_tests.rs"]
mod bundle_tests;
