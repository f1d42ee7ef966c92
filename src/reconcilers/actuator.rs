// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lifecycle actuator of the DNS add-on.
//!
//! The actuator drives the five lifecycle operations of a tenant's DNS add-on:
//!
//! - **Reconcile** - snapshot the tenant's entries, deploy both resource bundles
//!   and converge the DNS providers. A tenant without a domain is torn down
//!   instead; a hibernated tenant has its entries drained and its controller
//!   scaled to zero.
//! - **Delete** - drain entries, clean up the tenant cluster, delete providers and
//!   both bundles.
//! - **Force delete** - best-effort delete for tenants that cannot be cleaned up
//!   gracefully. Finalizers of stuck entries are stripped, which may leave
//!   records behind at the DNS provider.
//! - **Migrate** - freeze the entries, persist the snapshot and remove everything
//!   from this control plane without touching the tenant cluster.
//! - **Restore** - unfreeze the entries, recreate the ones missing from the
//!   snapshot and reconcile.
//!
//! Nothing is remembered between calls: every operation rebuilds its
//! [`ExtensionContext`] from the store.
//!
//! Updates of the persisted snapshot happen under the tenant key of the shared
//! [`NamedLocks`] registry, the same registry the replication reconciler uses.

use crate::bundle::ResourceBundleManager;
use crate::config::{DnsConfig, ServiceConfig};
use crate::constants::{
    BUNDLE_CLASS_SEED, LOCK_JITTER_MAX_MILLIS, LOCK_JITTER_MIN_MILLIS, SEED_BUNDLE_NAME,
    SEED_BUNDLE_TEMPLATE, SERVICE_NAME, SHOOT_BUNDLE_NAME, SHOOT_BUNDLE_TEMPLATE,
};
use crate::crd::Extension;
use crate::errors::{is_entries_stuck, ActuatorError};
use crate::labels::{shoot_id_label_value, ANNOTATION_DROP_STATE, LABEL_SHOOT_ID};
use crate::metrics;
use crate::reconcilers::entries::{
    annotate_ignore, clear_markers, drain_entries, resurrect_entries, strip_entry_finalizers,
    wait_operations_settled,
};
use crate::reconcilers::providers::{
    converge_providers, delete_all_providers, desired_providers, ProviderInputs,
};
use crate::reconcilers::retry::jitter;
use crate::reconcilers::status::{self, last_operation, OperationState, OperationType};
use crate::shoot::ShootDescriptor;
use crate::shoot_access::ShootAccess;
use crate::state::lock::{NamedLockGuard, NamedLocks};
use crate::state::{RefreshMode, StateManager};
use crate::store::{Labels, SeedStore};
use anyhow::{anyhow, Context as _, Result};
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Replica policy of the DNS controller deployed by the control-plane bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    /// Regular operation
    Normal,
    /// Entries are being drained before teardown
    CleaningUp,
    /// Controller stopped
    ScaledDown,
}

impl OperatingMode {
    /// Replica count for this mode.
    #[must_use]
    pub fn replicas(self, hibernated: bool, use_next_generation_controller: bool) -> i32 {
        match self {
            Self::Normal => i32::from(!hibernated),
            Self::CleaningUp => i32::from(use_next_generation_controller),
            Self::ScaledDown => 0,
        }
    }
}

/// Everything an operation needs to know about one tenant, loaded fresh per call.
#[derive(Clone, Debug)]
pub struct ExtensionContext {
    /// The extension object as handed to the operation
    pub extension: Extension,
    /// Control-plane namespace
    pub namespace: String,
    /// Tenant DNS configuration
    pub dns_config: DnsConfig,
    /// Tenant descriptor
    pub shoot: ShootDescriptor,
    /// Value of the tenant label on DNS entries
    pub shoot_id: String,
}

impl ExtensionContext {
    /// Build the context of `extension`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider config is malformed or the tenant's
    /// `Cluster` is missing or undecodable.
    pub async fn load(store: &dyn SeedStore, extension: &Extension) -> Result<Self> {
        let namespace = extension
            .namespace()
            .ok_or_else(|| anyhow!("extension {} has no namespace", extension.name_any()))?;
        let dns_config = DnsConfig::from_extension(extension)?;
        let cluster = store
            .get_cluster(&namespace)
            .await?
            .ok_or_else(|| anyhow!("cluster {namespace} not found"))?;
        let shoot = ShootDescriptor::from_cluster(&cluster)?;
        let shoot_id = shoot_id_label_value(&shoot.cluster_identity);

        Ok(Self {
            extension: extension.clone(),
            namespace,
            dns_config,
            shoot,
            shoot_id,
        })
    }

    /// Name of the extension object.
    #[must_use]
    pub fn name(&self) -> String {
        self.extension.name_any()
    }

    /// Selector of the tenant's DNS entries.
    #[must_use]
    pub fn entry_selector(&self) -> Labels {
        Labels::from([(LABEL_SHOOT_ID.to_string(), self.shoot_id.clone())])
    }

    fn drop_state_requested(&self) -> bool {
        self.extension.annotations().contains_key(ANNOTATION_DROP_STATE)
    }
}

/// The lifecycle actuator.
pub struct Actuator {
    store: Arc<dyn SeedStore>,
    bundles: Arc<dyn ResourceBundleManager>,
    shoot_access: Arc<dyn ShootAccess>,
    config: ServiceConfig,
    locks: Arc<NamedLocks>,
}

impl Actuator {
    /// Create an actuator. `locks` must be shared with the replication reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn SeedStore>,
        bundles: Arc<dyn ResourceBundleManager>,
        shoot_access: Arc<dyn ShootAccess>,
        config: ServiceConfig,
        locks: Arc<NamedLocks>,
    ) -> Self {
        Self {
            store,
            bundles,
            shoot_access,
            config,
            locks,
        }
    }

    /// Service configuration of this actuator.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Converge the tenant's DNS add-on to its desired state.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; the operation is safe to retry.
    pub async fn reconcile(&self, extension: &Extension) -> Result<()> {
        let started = Instant::now();
        let result = self.run_reconcile(extension, false).await;
        self.finish(extension, OperationType::Reconcile, "reconcile", started, result)
            .await
    }

    /// Tear the tenant's DNS add-on down.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::EntriesStuck`] while entries refuse to go away, or
    /// the first failing step.
    pub async fn delete(&self, extension: &Extension) -> Result<()> {
        let started = Instant::now();
        let result = async {
            let ctx = self.begin(extension, OperationType::Delete).await?;
            self.teardown(&ctx).await?;
            metrics::forget_persisted_state_size(&ctx.namespace);
            Ok::<_, anyhow::Error>(())
        }
        .await;
        self.finish(extension, OperationType::Delete, "delete", started, result)
            .await
    }

    /// Best-effort teardown that does not wait for stuck entries.
    ///
    /// # Errors
    ///
    /// Returns store or bundle failures; stuck entries are tolerated.
    pub async fn force_delete(&self, extension: &Extension) -> Result<()> {
        let started = Instant::now();
        let result = async {
            let ctx = self.begin(extension, OperationType::Delete).await?;
            self.force_teardown(&ctx).await?;
            metrics::forget_persisted_state_size(&ctx.namespace);
            Ok::<_, anyhow::Error>(())
        }
        .await;
        self.finish(extension, OperationType::Delete, "force_delete", started, result)
            .await
    }

    /// Hand the tenant over to another control plane.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; the operation is safe to retry.
    pub async fn migrate(&self, extension: &Extension) -> Result<()> {
        let started = Instant::now();
        let result = async {
            let ctx = self.begin(extension, OperationType::Migrate).await?;
            self.run_migrate(&ctx).await?;
            metrics::forget_persisted_state_size(&ctx.namespace);
            Ok::<_, anyhow::Error>(())
        }
        .await;
        self.finish(extension, OperationType::Migrate, "migrate", started, result)
            .await
    }

    /// Take the tenant over from another control plane.
    ///
    /// # Errors
    ///
    /// Returns a timeout if entries keep pending operations, or the first
    /// failing reconcile step.
    pub async fn restore(&self, extension: &Extension) -> Result<()> {
        let started = Instant::now();
        let result = async {
            let ctx = self.begin(extension, OperationType::Restore).await?;
            let selector = ctx.entry_selector();
            let cleared = clear_markers(self.store.as_ref(), &ctx.namespace, &selector).await?;
            debug!(namespace = %ctx.namespace, cleared, "Cleared migration markers");
            wait_operations_settled(
                self.store.as_ref(),
                &ctx.namespace,
                &selector,
                &self.config.timing,
            )
            .await?;
            self.reconcile_context(&ctx, true).await
        }
        .await;
        self.finish(extension, OperationType::Restore, "restore", started, result)
            .await
    }

    // ------------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------------

    async fn run_reconcile(&self, extension: &Extension, restoring: bool) -> Result<()> {
        let ctx = self.begin(extension, OperationType::Reconcile).await?;
        self.reconcile_context(&ctx, restoring).await
    }

    async fn reconcile_context(&self, ctx: &ExtensionContext, restoring: bool) -> Result<()> {
        let namespace = ctx.namespace.as_str();
        if ctx.shoot.domain.is_none() {
            info!(namespace, "Tenant has no DNS domain, removing DNS add-on");
            return self.teardown(ctx).await;
        }
        if ctx.shoot.hibernated {
            return self.hibernate(ctx, restoring).await;
        }

        self.sync_state(ctx, restoring, RefreshMode::Exact, "reconcile").await?;

        let replication = self.replication_enabled(ctx);
        self.deploy_shoot_bundle(ctx, replication).await?;
        self.deploy_seed_bundle(ctx, OperatingMode::Normal, replication)
            .await?;

        if self.config.manage_dns_providers {
            let desired = desired_providers(&ProviderInputs {
                store: self.store.as_ref(),
                config: &self.config,
                namespace,
                shoot: &ctx.shoot,
                dns_config: &ctx.dns_config,
            })
            .await?;
            converge_providers(&self.store, &self.config.timing, namespace, desired, !replication)
                .await?;
        }

        info!(namespace, "DNS add-on reconciled");
        Ok(())
    }

    /// Drain a hibernated tenant. Drained entries stay in the snapshot, so a
    /// migration while hibernated still carries them.
    async fn hibernate(&self, ctx: &ExtensionContext, restoring: bool) -> Result<()> {
        let namespace = ctx.namespace.as_str();
        info!(namespace, "Tenant is hibernated, draining DNS entries");

        self.sync_state(ctx, restoring, RefreshMode::KeepMissing, "hibernation")
            .await?;
        let replication = self.replication_enabled(ctx);
        self.deploy_seed_bundle(ctx, OperatingMode::CleaningUp, replication)
            .await?;
        drain_entries(
            self.store.as_ref(),
            namespace,
            &ctx.entry_selector(),
            &self.config.timing,
        )
        .await?;
        if self.config.manage_dns_providers {
            delete_all_providers(&self.store, &self.config.timing, namespace, true).await?;
        }
        self.deploy_seed_bundle(ctx, OperatingMode::Normal, replication)
            .await
    }

    async fn teardown(&self, ctx: &ExtensionContext) -> Result<()> {
        let namespace = ctx.namespace.as_str();
        let replication = self.replication_enabled(ctx);

        self.deploy_seed_bundle(ctx, OperatingMode::CleaningUp, replication)
            .await?;
        drain_entries(
            self.store.as_ref(),
            namespace,
            &ctx.entry_selector(),
            &self.config.timing,
        )
        .await?;
        self.sync_state(ctx, false, RefreshMode::Exact, "entries drained")
            .await?;

        if !ctx.shoot.deleting && !ctx.shoot.hibernated {
            self.cleanup_tenant_cluster(namespace).await?;
        }

        if self.config.manage_dns_providers {
            delete_all_providers(&self.store, &self.config.timing, namespace, true).await?;
        }
        self.delete_bundle(namespace, SEED_BUNDLE_NAME).await?;
        self.delete_bundle(namespace, SHOOT_BUNDLE_NAME).await?;

        info!(namespace, "DNS add-on deleted");
        Ok(())
    }

    async fn force_teardown(&self, ctx: &ExtensionContext) -> Result<()> {
        let namespace = ctx.namespace.as_str();
        let selector = ctx.entry_selector();

        if let Err(e) = drain_entries(self.store.as_ref(), namespace, &selector, &self.config.timing).await {
            if !is_entries_stuck(&e) {
                return Err(e);
            }
            warn!(namespace, error = %e, "Forcing deletion despite stuck DNS entries");
        }

        self.bundles.delete(namespace, SEED_BUNDLE_NAME).await?;
        if let Err(e) = self
            .bundles
            .wait_until_deleted(namespace, SEED_BUNDLE_NAME, self.config.timing.bundle_delete_timeout)
            .await
        {
            warn!(namespace, error = %e, "Control-plane bundle still present, continuing");
        }

        let stripped = strip_entry_finalizers(self.store.as_ref(), namespace, &selector).await?;
        if stripped > 0 {
            warn!(namespace, stripped, "DNS records of force-deleted entries may remain at the provider");
        }

        if self.config.manage_dns_providers {
            delete_all_providers(&self.store, &self.config.timing, namespace, true).await?;
        }
        info!(namespace, "DNS add-on force-deleted");
        Ok(())
    }

    async fn run_migrate(&self, ctx: &ExtensionContext) -> Result<()> {
        let namespace = ctx.namespace.as_str();

        self.bundles
            .set_keep_objects(namespace, SHOOT_BUNDLE_NAME, true)
            .await?;
        let annotated = annotate_ignore(self.store.as_ref(), namespace, &ctx.entry_selector()).await?;
        info!(namespace, annotated, "DNS entries frozen for migration");

        {
            let _guard = self.lock_tenant(namespace).await?;
            let mut state = self.new_state(ctx);
            let current = self.store.get_extension(namespace, &ctx.name()).await?;
            state.load(current.as_ref().unwrap_or(&ctx.extension));
            if ctx.drop_state_requested() {
                info!(namespace, "Dropping DNS entry state on request");
                state.drop_all_entries();
            } else if ctx.shoot.hibernated {
                state.refresh(RefreshMode::KeepMissing).await?;
            } else {
                state.refresh(RefreshMode::Exact).await?;
            }
            state.update("migrate").await?;
        }

        if self.config.manage_dns_providers {
            delete_all_providers(&self.store, &self.config.timing, namespace, true).await?;
        }
        self.delete_bundle(namespace, SEED_BUNDLE_NAME).await?;
        self.delete_bundle(namespace, SHOOT_BUNDLE_NAME).await?;

        info!(namespace, "DNS add-on migrated away");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    async fn begin(&self, extension: &Extension, operation: OperationType) -> Result<ExtensionContext> {
        let ctx = ExtensionContext::load(self.store.as_ref(), extension).await?;
        info!(namespace = %ctx.namespace, operation = %operation, "Starting DNS add-on operation");
        status::report(
            self.store.as_ref(),
            &ctx.namespace,
            &ctx.name(),
            &last_operation(operation, OperationState::Processing, &format!("{operation} of DNS add-on started")),
        )
        .await;
        Ok(ctx)
    }

    async fn finish(
        &self,
        extension: &Extension,
        operation: OperationType,
        metric: &str,
        started: Instant,
        result: Result<()>,
    ) -> Result<()> {
        let elapsed = started.elapsed();
        match &result {
            Ok(()) => metrics::record_operation_success(metric, elapsed),
            Err(e) => {
                metrics::record_operation_error(metric, elapsed);
                warn!(extension = %extension.name_any(), operation = %operation, error = %format!("{e:#}"), "DNS add-on operation failed");
            }
        }
        if let Some(namespace) = extension.namespace() {
            status::report(
                self.store.as_ref(),
                &namespace,
                &extension.name_any(),
                &status::outcome(operation, &result),
            )
            .await;
        }
        result
    }

    fn replication_enabled(&self, ctx: &ExtensionContext) -> bool {
        ctx.dns_config
            .replication_enabled(self.config.replicate_dns_providers)
    }

    fn new_state(&self, ctx: &ExtensionContext) -> StateManager {
        StateManager::new(
            Arc::clone(&self.store),
            ctx.namespace.clone(),
            ctx.name(),
            ctx.shoot_id.clone(),
        )
    }

    /// Take the tenant key, backing off with jitter while it is busy.
    async fn lock_tenant(&self, namespace: &str) -> Result<NamedLockGuard> {
        let attempts = self.config.timing.lock_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(guard) = self.locks.try_lock(namespace) {
                return Ok(guard);
            }
            metrics::record_lock_contention("actuator");
            debug!(namespace, attempt, "DNS entry state is locked, backing off");
            tokio::time::sleep(jitter(
                Duration::from_millis(LOCK_JITTER_MIN_MILLIS),
                Duration::from_millis(LOCK_JITTER_MAX_MILLIS),
            ))
            .await;
        }
        Err(ActuatorError::LockBusy(namespace.to_string()).into())
    }

    /// Refresh the snapshot from the live entries and persist it.
    ///
    /// With `restoring`, entries of the persisted snapshot missing from the
    /// cluster are recreated first.
    async fn sync_state(
        &self,
        ctx: &ExtensionContext,
        restoring: bool,
        mode: RefreshMode,
        reason: &str,
    ) -> Result<()> {
        let namespace = ctx.namespace.as_str();
        let _guard = self.lock_tenant(namespace).await?;

        let mut state = self.new_state(ctx);
        let current = self.store.get_extension(namespace, &ctx.name()).await?;
        state.load(current.as_ref().unwrap_or(&ctx.extension));

        if restoring && !state.is_empty() {
            let created = resurrect_entries(self.store.as_ref(), &state).await?;
            info!(namespace, created, "Restored DNS entries from persisted state");
        }

        state.refresh(mode).await?;
        state.update(reason).await
    }

    /// Values of the control-plane bundle.
    #[must_use]
    pub fn seed_values(&self, ctx: &ExtensionContext, mode: OperatingMode, replication: bool) -> serde_json::Value {
        json!({
            "serviceName": SERVICE_NAME,
            "replicas": mode.replicas(ctx.shoot.hibernated, self.config.use_next_generation_controller),
            "shootId": ctx.shoot_id,
            "seedId": self.config.seed_id,
            "dnsClass": self.config.dns_class,
            "restrictToControlPlane": mode != OperatingMode::Normal,
            "useNextGenerationController": self.config.use_next_generation_controller,
            "dnsProviderReplication": { "enabled": replication },
        })
    }

    async fn deploy_seed_bundle(&self, ctx: &ExtensionContext, mode: OperatingMode, replication: bool) -> Result<()> {
        let values = self.seed_values(ctx, mode, replication);
        debug!(namespace = %ctx.namespace, mode = ?mode, "Deploying control-plane bundle");
        self.bundles
            .create_or_update(
                &ctx.namespace,
                SEED_BUNDLE_NAME,
                Some(BUNDLE_CLASS_SEED),
                SEED_BUNDLE_TEMPLATE,
                &values,
                &ctx.entry_selector(),
            )
            .await
            .context("failed to deploy control-plane bundle")
    }

    async fn deploy_shoot_bundle(&self, ctx: &ExtensionContext, replication: bool) -> Result<()> {
        let values = json!({
            "serviceName": SERVICE_NAME,
            "dnsProviderReplication": { "enabled": replication },
        });
        self.bundles.set_keep_objects(&ctx.namespace, SHOOT_BUNDLE_NAME, false).await?;
        self.bundles
            .create_or_update(
                &ctx.namespace,
                SHOOT_BUNDLE_NAME,
                None,
                SHOOT_BUNDLE_TEMPLATE,
                &values,
                &Labels::new(),
            )
            .await
            .context("failed to deploy tenant bundle")
    }

    async fn delete_bundle(&self, namespace: &str, name: &str) -> Result<()> {
        self.bundles.delete(namespace, name).await?;
        self.bundles
            .wait_until_deleted(namespace, name, self.config.timing.bundle_delete_timeout)
            .await
    }

    async fn cleanup_tenant_cluster(&self, namespace: &str) -> Result<()> {
        let cluster = self
            .shoot_access
            .client(namespace)
            .await
            .context("failed to access tenant cluster")?;
        let stripped = cluster.strip_dns_finalizers().await?;
        cluster.delete_dns_crds().await?;
        info!(namespace, stripped, "Cleaned up DNS resources in tenant cluster");
        Ok(())
    }
}

#[cfg(test)]
#[path = "actuator_tests.rs"]
mod actuator_tests;
