// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS provider set reconciliation.
//!
//! Each pass computes the desired providers of a tenant from its configuration
//! and converges the live providers in the control-plane namespace to that set:
//!
//! 1. **External provider** - serves the tenant's own domain. It comes from the
//!    remote default-domain secret, or from the sibling `DNSRecord`
//!    `<shoot>-external`, and is omitted when one of the tenant's own providers is
//!    marked primary.
//! 2. **Additional providers** - one per declared provider, named after its type
//!    and credential reference. Credentials are resolved through the shoot's
//!    `spec.resources` to the copied `ref-<name>` secret.
//!
//! Invalid declarations are collected and reported together; nothing is deployed
//! while any declaration is invalid.
//!
//! Providers replicated from the tenant cluster carry [`LABEL_REPLICATED`] and are
//! only deleted when explicitly requested.

use crate::config::{DnsConfig, DnsProviderConfig, IncludeExclude, ServiceConfig, Timing};
use crate::constants::{
    EXTERNAL_DNS_RECORD_SUFFIX, EXTERNAL_PROVIDER_NAME, PROVIDER_TYPE_REMOTE,
    PROVIDER_TYPE_UNMANAGED, REFERENCED_RESOURCES_PREFIX,
};
use crate::crd::{DNSProvider, DNSProviderSpec, SecretReference, SelectionCriteria};
use crate::errors::{ActuatorError, ProviderError};
use crate::labels::{
    provider_name, ANNOTATION_DNS_CLASS, ANNOTATION_TIMESTAMP, K8S_MANAGED_BY, LABEL_REPLICATED,
    LABEL_ROLE, MANAGED_BY_SHOOT_DNS_SERVICE, ROLE_MANAGED_DNS_PROVIDER,
};
use crate::reconcilers::deploy::{self, next_timestamp, stamp, Deployable};
use crate::reconcilers::retry::{poll_until, Ticker};
use crate::shoot::ShootDescriptor;
use crate::store::{Labels, SeedStore};
use crate::workload_identity::{
    TargetSystem, WorkloadIdentityConfig, CONFIG_DATA_KEY, LABEL_TARGET_SYSTEM,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Annotation remembering the workload identity config a provider was deployed with.
pub const ANNOTATION_WORKLOAD_IDENTITY: &str = "dns.gardener.cloud/workload-identity-config";

/// Kind of a shoot resource reference pointing at a workload identity.
const KIND_WORKLOAD_IDENTITY: &str = "WorkloadIdentity";

/// Kind of a shoot resource reference pointing at a secret.
const KIND_SECRET: &str = "Secret";

/// Provider state as reported by the DNS controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderState {
    /// No state reported yet
    Unknown,
    /// Provider is usable
    Ready,
    /// Provider failed, e.g. bad credentials
    Error,
    /// Provider configuration was rejected
    Invalid,
    /// Any other state
    Other(String),
}

impl ProviderState {
    /// Classify a reported state string.
    #[must_use]
    pub fn parse(state: Option<&str>) -> Self {
        match state {
            None | Some("") => Self::Unknown,
            Some("Ready") => Self::Ready,
            Some("Error") => Self::Error,
            Some("Invalid") => Self::Invalid,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// Readiness of a provider for the deployment that wrote `timestamp`.
///
/// Returns `Ok(true)` only when the observation is current (observed generation
/// equals generation and the timestamp annotation matches) and the state is
/// `Ready`. `Error` and `Invalid` states are returned as errors so callers back
/// off and check again.
///
/// # Errors
///
/// Returns [`ProviderError::Failed`] or [`ProviderError::Invalid`] for a current
/// observation in one of those states.
pub fn check_ready(provider: &DNSProvider, timestamp: &str) -> Result<bool, ProviderError> {
    let name = provider.name_any();
    let generation = provider.metadata.generation;
    let status = provider.status.as_ref();
    let observed = status.and_then(|s| s.observed_generation);
    let stamped = provider.annotations().get(ANNOTATION_TIMESTAMP).map(String::as_str);

    if generation.is_none() || observed != generation || stamped != Some(timestamp) {
        return Ok(false);
    }

    let message = status.and_then(|s| s.message.clone()).unwrap_or_default();
    match ProviderState::parse(status.and_then(|s| s.state.as_deref())) {
        ProviderState::Ready => Ok(true),
        ProviderState::Error => Err(ProviderError::Failed { name, message }),
        ProviderState::Invalid => Err(ProviderError::Invalid { name, message }),
        ProviderState::Unknown | ProviderState::Other(_) => Ok(false),
    }
}

/// A desired or live DNS provider handled through the deploy abstraction.
pub struct ProviderDeployable {
    store: Arc<dyn SeedStore>,
    provider: DNSProvider,
    timing: Timing,
}

impl ProviderDeployable {
    /// Wrap a provider object.
    #[must_use]
    pub fn new(store: Arc<dyn SeedStore>, provider: DNSProvider, timing: Timing) -> Self {
        Self {
            store,
            provider,
            timing,
        }
    }

    fn namespace(&self) -> String {
        self.provider.namespace().unwrap_or_default()
    }
}

#[async_trait]
impl Deployable for ProviderDeployable {
    fn describe(&self) -> String {
        format!("DNS provider {}/{}", self.namespace(), self.provider.name_any())
    }

    async fn deploy(&self) -> Result<String> {
        let namespace = self.namespace();
        let name = self.provider.name_any();
        let existing = self.store.get_provider(&namespace, &name).await?;
        let previous = existing
            .as_ref()
            .and_then(|p| p.annotations().get(ANNOTATION_TIMESTAMP).cloned());
        let timestamp = next_timestamp(previous.as_deref(), chrono::Utc::now());

        let mut desired = self.provider.clone();
        stamp(desired.annotations_mut(), &timestamp);
        self.store.apply_provider(&desired).await?;
        Ok(timestamp)
    }

    async fn wait_ready(&self, timestamp: &str) -> Result<()> {
        let namespace = self.namespace();
        let name = self.provider.name_any();
        let mut ticker = Ticker::with_timeout(
            self.timing.provider_poll_interval,
            self.timing.provider_timeout,
        );

        loop {
            let problem = match self.store.get_provider(&namespace, &name).await? {
                Some(current) => match check_ready(&current, timestamp) {
                    Ok(true) => return Ok(()),
                    Ok(false) => ProviderError::NotReady {
                        name: name.clone(),
                        state: current
                            .status
                            .as_ref()
                            .and_then(|s| s.state.clone())
                            .unwrap_or_default(),
                    },
                    Err(e) => {
                        debug!(namespace = %namespace, provider = %name, error = %e, "Provider not usable yet");
                        e
                    }
                },
                None => ProviderError::NotReady {
                    name: name.clone(),
                    state: "absent".to_string(),
                },
            };

            if !ticker.tick().await {
                return Err(ActuatorError::Timeout {
                    what: format!("DNS provider {namespace}/{name} to become ready (last seen: {problem})"),
                    waited: ticker.elapsed(),
                }
                .into());
            }
        }
    }

    async fn destroy(&self) -> Result<()> {
        self.store
            .delete_provider(&self.namespace(), &self.provider.name_any())
            .await
    }

    async fn wait_deleted(&self) -> Result<()> {
        let namespace = self.namespace();
        let name = self.provider.name_any();
        let ticker = Ticker::with_timeout(
            self.timing.provider_poll_interval,
            self.timing.provider_timeout,
        );
        let store = &self.store;
        let (ns, nm) = (namespace.as_str(), name.as_str());
        poll_until(
            ticker,
            &format!("DNS provider {namespace}/{name} to be deleted"),
            move || async move { Ok(store.get_provider(ns, nm).await?.is_none().then_some(())) },
        )
        .await
    }
}

/// Inputs of the desired-set computation.
pub struct ProviderInputs<'a> {
    /// Resource store
    pub store: &'a dyn SeedStore,
    /// Service configuration
    pub config: &'a ServiceConfig,
    /// Control-plane namespace of the tenant
    pub namespace: &'a str,
    /// Tenant descriptor
    pub shoot: &'a ShootDescriptor,
    /// Tenant DNS configuration
    pub dns_config: &'a DnsConfig,
}

/// Selector of the providers owned by this service.
#[must_use]
pub fn managed_provider_selector() -> Labels {
    Labels::from([(LABEL_ROLE.to_string(), ROLE_MANAGED_DNS_PROVIDER.to_string())])
}

/// Selector of providers replicated from the tenant cluster.
#[must_use]
pub fn replicated_provider_selector() -> Labels {
    Labels::from([(LABEL_REPLICATED.to_string(), "true".to_string())])
}

fn is_replicated(provider: &DNSProvider) -> bool {
    provider
        .labels()
        .get(LABEL_REPLICATED)
        .is_some_and(|v| v == "true")
}

fn criteria(filter: Option<&IncludeExclude>) -> Option<SelectionCriteria> {
    filter.and_then(|f| SelectionCriteria::non_empty(f.include.clone(), f.exclude.clone()))
}

fn build_provider(
    namespace: &str,
    name: &str,
    dns_class: &str,
    spec: DNSProviderSpec,
) -> DNSProvider {
    let mut provider = DNSProvider::new(name, spec);
    provider.metadata.namespace = Some(namespace.to_string());
    provider.metadata.labels = Some(BTreeMap::from([
        (LABEL_ROLE.to_string(), ROLE_MANAGED_DNS_PROVIDER.to_string()),
        (
            K8S_MANAGED_BY.to_string(),
            MANAGED_BY_SHOOT_DNS_SERVICE.to_string(),
        ),
    ]));
    provider.metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_DNS_CLASS.to_string(),
        dns_class.to_string(),
    )]));
    provider
}

/// Providers declared for the tenant, from the extension or the shoot spec.
#[must_use]
pub fn declared_providers<'a>(
    dns_config: &'a DnsConfig,
    shoot: &'a ShootDescriptor,
) -> &'a [DnsProviderConfig] {
    if dns_config.sync_providers_from_shoot() {
        &shoot.dns_providers
    } else {
        &dns_config.providers
    }
}

/// Compute the desired provider set.
///
/// # Errors
///
/// Returns [`ActuatorError::InvalidProviders`] listing every invalid declaration,
/// or a store error.
pub async fn desired_providers(inputs: &ProviderInputs<'_>) -> Result<Vec<DNSProvider>> {
    let declared = declared_providers(inputs.dns_config, inputs.shoot);
    let mut desired = Vec::new();

    if !declared.iter().any(DnsProviderConfig::is_primary) {
        if let Some(external) = external_provider(inputs).await? {
            desired.push(external);
        }
    }

    let mut problems = Vec::new();
    for (index, declaration) in declared.iter().enumerate() {
        match additional_provider(inputs, index, declaration).await? {
            Ok(Some(provider)) => desired.push(provider),
            Ok(None) => {}
            Err(problem) => problems.push(problem),
        }
    }

    if !problems.is_empty() {
        return Err(ActuatorError::InvalidProviders(problems).into());
    }
    Ok(desired)
}

async fn external_provider(inputs: &ProviderInputs<'_>) -> Result<Option<DNSProvider>> {
    let Some(domain) = inputs.shoot.domain.clone() else {
        return Ok(None);
    };
    let domains = SelectionCriteria::non_empty(vec![domain], Vec::new());

    if let Some(secret) = &inputs.config.remote_default_domain_secret {
        return Ok(Some(build_provider(
            inputs.namespace,
            EXTERNAL_PROVIDER_NAME,
            &inputs.config.dns_class,
            DNSProviderSpec {
                type_: PROVIDER_TYPE_REMOTE.to_string(),
                secret_ref: Some(secret.clone()),
                domains,
                ..Default::default()
            },
        )));
    }

    let record_name = format!("{}{EXTERNAL_DNS_RECORD_SUFFIX}", inputs.shoot.name);
    let Some(record) = inputs
        .store
        .get_dns_record(inputs.namespace, &record_name)
        .await?
    else {
        debug!(namespace = %inputs.namespace, record = %record_name, "No external DNS record, skipping external provider");
        return Ok(None);
    };

    Ok(Some(build_provider(
        inputs.namespace,
        EXTERNAL_PROVIDER_NAME,
        &inputs.config.dns_class,
        DNSProviderSpec {
            type_: record.spec.type_.clone(),
            secret_ref: Some(SecretReference {
                name: record.spec.secret_ref.name.clone(),
                namespace: record
                    .spec
                    .secret_ref
                    .namespace
                    .clone()
                    .or_else(|| record.namespace()),
            }),
            domains,
            ..Default::default()
        },
    )))
}

/// Resolve one declaration. The outer `Result` carries store failures, the inner
/// one validation problems.
async fn additional_provider(
    inputs: &ProviderInputs<'_>,
    index: usize,
    declaration: &DnsProviderConfig,
) -> Result<Result<Option<DNSProvider>, String>> {
    let Some(provider_type) = declaration.type_.as_deref().filter(|t| !t.is_empty()) else {
        return Ok(Err(format!("provider[{index}]: type is required")));
    };
    if provider_type == PROVIDER_TYPE_UNMANAGED {
        info!(namespace = %inputs.namespace, index, "Skipping unmanaged DNS provider");
        return Ok(Ok(None));
    }
    let Some(secret_name) = declaration.secret_name.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(Err(format!(
            "provider[{index}] ({provider_type}): secretName is required"
        )));
    };
    let Some(reference) = inputs.shoot.resource(secret_name) else {
        return Ok(Err(format!(
            "provider[{index}] ({provider_type}): secretName {secret_name:?} is not listed in the shoot resources"
        )));
    };

    let copied = format!("{REFERENCED_RESOURCES_PREFIX}{}", reference.resource_ref.name);
    let Some(secret) = inputs.store.get_secret(inputs.namespace, &copied).await? else {
        return Ok(Err(format!(
            "provider[{index}] ({provider_type}): referenced secret {}/{copied} does not exist",
            inputs.namespace
        )));
    };

    let name = provider_name(provider_type, secret_name);
    let mut provider = build_provider(
        inputs.namespace,
        &name,
        &inputs.config.dns_class,
        DNSProviderSpec {
            type_: provider_type.to_string(),
            secret_ref: Some(SecretReference {
                name: copied.clone(),
                namespace: None,
            }),
            domains: criteria(declaration.domains.as_ref()),
            zones: criteria(declaration.zones.as_ref()),
            default_ttl: None,
        },
    );

    match reference.resource_ref.kind.as_str() {
        KIND_SECRET => {}
        KIND_WORKLOAD_IDENTITY => {
            let identity = match workload_identity_of(provider_type, &secret) {
                Ok(identity) => identity,
                Err(problem) => {
                    return Ok(Err(format!(
                        "provider[{index}] ({provider_type}): {problem}"
                    )))
                }
            };
            if let Some(existing) = inputs.store.get_provider(inputs.namespace, &name).await? {
                let previous = existing
                    .annotations()
                    .get(ANNOTATION_WORKLOAD_IDENTITY)
                    .and_then(|raw| {
                        WorkloadIdentityConfig::decode(identity.target(), raw.as_bytes()).ok()
                    });
                if let Some(previous) = previous {
                    let errors = identity.validate_update(&previous);
                    if !errors.is_empty() {
                        return Ok(Err(format!(
                            "provider[{index}] ({provider_type}): {}",
                            errors.join("; ")
                        )));
                    }
                }
            }
            let encoded = identity.to_json()?;
            provider
                .annotations_mut()
                .insert(ANNOTATION_WORKLOAD_IDENTITY.to_string(), encoded);
        }
        other => {
            return Ok(Err(format!(
                "provider[{index}] ({provider_type}): unsupported resource kind {other:?} for {secret_name:?}"
            )))
        }
    }

    Ok(Ok(Some(provider)))
}

fn workload_identity_of(
    provider_type: &str,
    secret: &k8s_openapi::api::core::v1::Secret,
) -> Result<WorkloadIdentityConfig, String> {
    let target: TargetSystem = secret
        .labels()
        .get(LABEL_TARGET_SYSTEM)
        .ok_or_else(|| format!("workload identity secret has no {LABEL_TARGET_SYSTEM} label"))?
        .parse()
        .map_err(|e| format!("{e}"))?;

    match TargetSystem::for_provider_type(provider_type) {
        Some(expected) if expected == target => {}
        Some(expected) => {
            return Err(format!(
                "workload identity targets {target}, provider type needs {expected}"
            ))
        }
        None => return Err("provider type does not support workload identity".to_string()),
    }

    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get(CONFIG_DATA_KEY))
        .ok_or_else(|| format!("workload identity secret has no {CONFIG_DATA_KEY} data"))?;
    WorkloadIdentityConfig::decode_valid(target, &raw.0).map_err(|e| e.to_string())
}

/// Converge the live providers of `namespace` to `desired`.
///
/// Live providers missing from `desired` are destroyed; replicated ones only
/// when `delete_replicated` is set.
///
/// # Errors
///
/// Returns the aggregated deploy/destroy failures, or a store error.
pub async fn converge_providers(
    store: &Arc<dyn SeedStore>,
    timing: &Timing,
    namespace: &str,
    desired: Vec<DNSProvider>,
    delete_replicated: bool,
) -> Result<()> {
    let mut live = store
        .list_providers(namespace, &managed_provider_selector())
        .await?;
    if delete_replicated {
        let known: BTreeSet<String> = live.iter().map(ResourceExt::name_any).collect();
        live.extend(
            store
                .list_providers(namespace, &replicated_provider_selector())
                .await?
                .into_iter()
                .filter(|p| !known.contains(&p.name_any())),
        );
    }

    let wanted: BTreeSet<String> = desired.iter().map(ResourceExt::name_any).collect();
    let mut destroy: Vec<Box<dyn Deployable>> = Vec::new();
    for provider in live {
        if wanted.contains(&provider.name_any()) {
            continue;
        }
        if is_replicated(&provider) && !delete_replicated {
            debug!(namespace, provider = %provider.name_any(), "Keeping replicated DNS provider");
            continue;
        }
        destroy.push(Box::new(ProviderDeployable::new(
            Arc::clone(store),
            provider,
            timing.clone(),
        )));
    }

    let deploy: Vec<Box<dyn Deployable>> = desired
        .into_iter()
        .map(|p| Box::new(ProviderDeployable::new(Arc::clone(store), p, timing.clone())) as Box<dyn Deployable>)
        .collect();

    if !destroy.is_empty() {
        warn!(namespace, count = destroy.len(), "Removing DNS providers no longer desired");
    }
    deploy::converge(deploy, destroy).await
}

/// Delete every provider of `namespace` owned by this service.
///
/// # Errors
///
/// Returns the aggregated destroy failures, or a store error.
pub async fn delete_all_providers(
    store: &Arc<dyn SeedStore>,
    timing: &Timing,
    namespace: &str,
    include_replicated: bool,
) -> Result<()> {
    converge_providers(store, timing, namespace, Vec::new(), include_replicated).await
}

#[cfg(test)]
#[path = "providers_tests.rs"]
mod providers_tests;
