// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access to the tenant (shoot) cluster.
//!
//! After the DNS controller stopped running inside a tenant cluster, DNS objects
//! left there may still carry its finalizers. Cleanup strips those finalizers and
//! then removes the DNS custom resource definitions.

use crate::constants::{API_VERSION, DNS_API_GROUP, SHOOT_KUBECONFIG_SECRET};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Data key of the kubeconfig inside the access secret.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// DNS kinds deployed into tenant clusters by earlier releases, with their plurals.
pub const TENANT_DNS_KINDS: &[(&str, &str)] = &[
    ("DNSEntry", "dnsentries"),
    ("DNSProvider", "dnsproviders"),
    ("DNSOwner", "dnsowners"),
    ("DNSAnnotation", "dnsannotations"),
];

/// Names of the tenant-side DNS custom resource definitions.
#[must_use]
pub fn tenant_dns_crd_names() -> Vec<String> {
    TENANT_DNS_KINDS
        .iter()
        .map(|(_, plural)| format!("{plural}.{DNS_API_GROUP}"))
        .collect()
}

/// Obtains clients for tenant clusters.
#[async_trait]
pub trait ShootAccess: Send + Sync {
    /// Client for the tenant whose control plane lives in `namespace`.
    async fn client(&self, namespace: &str) -> Result<Arc<dyn ShootCluster>>;
}

/// Operations performed inside a tenant cluster.
#[async_trait]
pub trait ShootCluster: Send + Sync {
    /// Remove all finalizers from every DNS object in the cluster.
    ///
    /// Returns the number of objects patched.
    async fn strip_dns_finalizers(&self) -> Result<usize>;

    /// Delete the DNS custom resource definitions; missing ones are skipped.
    async fn delete_dns_crds(&self) -> Result<()>;
}

/// [`ShootAccess`] reading the tenant kubeconfig from a control-plane secret.
#[derive(Clone)]
pub struct KubeShootAccess {
    client: Client,
}

impl KubeShootAccess {
    /// Wrap the control-plane client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShootAccess for KubeShootAccess {
    async fn client(&self, namespace: &str) -> Result<Arc<dyn ShootCluster>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(SHOOT_KUBECONFIG_SECRET)
            .await
            .with_context(|| format!("failed to read {namespace}/{SHOOT_KUBECONFIG_SECRET}"))?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_KEY))
            .ok_or_else(|| anyhow!("secret {namespace}/{SHOOT_KUBECONFIG_SECRET} has no {KUBECONFIG_KEY}"))?;
        let yaml = std::str::from_utf8(&raw.0).context("tenant kubeconfig is not UTF-8")?;

        let kubeconfig = Kubeconfig::from_yaml(yaml).context("failed to parse tenant kubeconfig")?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("failed to load tenant kubeconfig")?;
        let client = Client::try_from(config).context("failed to build tenant client")?;

        Ok(Arc::new(KubeShootCluster { client }))
    }
}

/// [`ShootCluster`] backed by a tenant `kube::Client`.
pub struct KubeShootCluster {
    client: Client,
}

#[async_trait]
impl ShootCluster for KubeShootCluster {
    async fn strip_dns_finalizers(&self) -> Result<usize> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let mut patched = 0;

        for (kind, plural) in TENANT_DNS_KINDS {
            let crd_name = format!("{plural}.{DNS_API_GROUP}");
            if crds.get_opt(&crd_name).await?.is_none() {
                continue;
            }

            let gvk = GroupVersionKind::gvk(DNS_API_GROUP, API_VERSION, kind);
            let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
            let all: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

            for object in all.list(&ListParams::default()).await? {
                if object.finalizers().is_empty() {
                    continue;
                }
                let namespace = object.namespace().unwrap_or_default();
                let api: Api<DynamicObject> =
                    Api::namespaced_with(self.client.clone(), &namespace, &resource);
                let patch = json!({ "metadata": { "finalizers": null } });
                api.patch(&object.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .with_context(|| {
                        format!("failed to strip finalizers of {kind} {namespace}/{}", object.name_any())
                    })?;
                debug!(kind, namespace = %namespace, name = %object.name_any(), "Stripped finalizers");
                patched += 1;
            }
        }

        Ok(patched)
    }

    async fn delete_dns_crds(&self) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        for name in tenant_dns_crd_names() {
            match crds.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!(crd = %name, "Deleted tenant DNS CRD"),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e).with_context(|| format!("failed to delete CRD {name}")),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "shoot_access_tests.rs"]
mod shoot_access_tests;
