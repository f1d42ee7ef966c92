// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{anyhow, Result};
use axum::{http::header::CONTENT_TYPE, http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::{ArgAction, Parser};
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use kube_lease_manager::LeaseManagerBuilder;
use shoot_dns_service::{
    bundle::KubeBundleManager,
    config::{ServiceConfig, Timing},
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS, DEFAULT_LEASE_NAME,
        ERROR_REQUEUE_DURATION_SECS, EXTENSION_TYPE, METRICS_SERVER_BIND_ADDRESS,
        METRICS_SERVER_PATH, METRICS_SERVER_PORT, SUCCESS_REQUEUE_DURATION_SECS,
        TOKIO_WORKER_THREADS,
    },
    crd::{DNSEntry, Extension, SecretReference},
    errors::stuck_retry_after,
    labels::{
        ANNOTATION_FORCE_DELETE, ANNOTATION_OPERATION, FINALIZER_EXTENSION, OPERATION_MIGRATE,
        OPERATION_RECONCILE, OPERATION_RESTORE,
    },
    metrics,
    reconcilers::{
        finalizers::{ensure_finalizer, has_finalizer, remove_annotation, remove_finalizer},
        Actuator, ReplicationReconciler,
    },
    shoot_access::KubeShootAccess,
    state::lock::NamedLocks,
    store::KubeSeedStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// DNS add-on lifecycle operator for managed Kubernetes clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "shoot-dns-service", version, about, long_about = None)]
struct Args {
    /// Identity of the control-plane host
    #[arg(long, env = "SEED_ID", default_value = "")]
    seed_id: String,

    /// DNS class handled by the deployed DNS controllers
    #[arg(long, env = "DNS_CLASS", default_value = "garden")]
    dns_class: String,

    /// Secret of the remote default domain, as `namespace/name` or `name`
    #[arg(long, env = "REMOTE_DEFAULT_DOMAIN_SECRET")]
    remote_default_domain_secret: Option<String>,

    /// Manage the tenants' DNS providers
    #[arg(long, env = "MANAGE_DNS_PROVIDERS", default_value_t = true, action = ArgAction::Set)]
    manage_dns_providers: bool,

    /// Replicate DNS providers from tenant clusters unless the tenant says otherwise
    #[arg(long, env = "REPLICATE_DNS_PROVIDERS", default_value_t = false, action = ArgAction::Set)]
    replicate_dns_providers: bool,

    /// Hand entries to the next generation DNS controller while cleaning up
    #[arg(long, env = "USE_NEXT_GENERATION_CONTROLLER", default_value_t = false, action = ArgAction::Set)]
    use_next_generation_controller: bool,

    /// Run without leader election
    #[arg(long, env = "DISABLE_LEADER_ELECTION")]
    disable_leader_election: bool,

    /// Name of the leader election lease
    #[arg(long, env = "LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    lease_name: String,

    /// Namespace of the leader election lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "garden")]
    lease_namespace: String,

    /// Leader election identity, random when unset
    #[arg(long, env = "POD_NAME")]
    identity: Option<String>,

    /// Port of the Prometheus metrics endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,
}

impl Args {
    fn service_config(&self) -> Result<ServiceConfig> {
        let remote_default_domain_secret = self
            .remote_default_domain_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(parse_secret_reference)
            .transpose()?;

        Ok(ServiceConfig {
            seed_id: self.seed_id.clone(),
            dns_class: self.dns_class.clone(),
            remote_default_domain_secret,
            manage_dns_providers: self.manage_dns_providers,
            replicate_dns_providers: self.replicate_dns_providers,
            use_next_generation_controller: self.use_next_generation_controller,
            timing: Timing::default(),
        })
    }
}

fn parse_secret_reference(value: &str) -> Result<SecretReference> {
    match value.split_once('/') {
        None => Ok(SecretReference {
            name: value.to_string(),
            namespace: None,
        }),
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(SecretReference {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
            })
        }
        Some(_) => Err(anyhow!("invalid secret reference {value:?}, expected namespace/name")),
    }
}

/// Lifecycle phase requested by an `Extension`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Reconcile,
    Delete,
    ForceDelete,
    Migrate,
    Restore,
}

fn phase_of(extension: &Extension) -> Phase {
    let annotations = extension.annotations();
    if extension.metadata.deletion_timestamp.is_some() {
        return if annotations.get(ANNOTATION_FORCE_DELETE).is_some_and(|v| v == "true") {
            Phase::ForceDelete
        } else {
            Phase::Delete
        };
    }
    match annotations.get(ANNOTATION_OPERATION).map(String::as_str) {
        Some(OPERATION_MIGRATE) => Phase::Migrate,
        Some(OPERATION_RESTORE) => Phase::Restore,
        _ => Phase::Reconcile,
    }
}

fn requeue_after_error(err: &anyhow::Error) -> Duration {
    stuck_retry_after(err).unwrap_or(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

struct Context {
    client: Client,
    actuator: Actuator,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("shoot-dns-service")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Respects RUST_LOG (default: info) and RUST_LOG_FORMAT (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    let args = Args::parse();
    let config = args.service_config()?;
    info!(seed_id = %config.seed_id, dns_class = %config.dns_class, "Starting DNS add-on operator");

    let client = Client::try_default().await?;

    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_port).await {
            error!(error = %e, "Metrics server stopped");
        }
    });

    let mut leadership = if args.disable_leader_election {
        info!("Leader election disabled");
        None
    } else {
        Some(acquire_leadership(client.clone(), &args).await?)
    };
    metrics::record_leader(true);

    let store = Arc::new(KubeSeedStore::new(client.clone()));
    let locks = Arc::new(NamedLocks::new());
    let actuator = Actuator::new(
        store.clone(),
        Arc::new(KubeBundleManager::new(client.clone(), config.timing.bundle_poll_interval)),
        Arc::new(KubeShootAccess::new(client.clone())),
        config,
        Arc::clone(&locks),
    );
    let replication = Arc::new(ReplicationReconciler::new(store, locks));
    let ctx = Arc::new(Context {
        client: client.clone(),
        actuator,
    });

    info!("Starting controllers");

    tokio::select! {
        result = run_extension_controller(ctx) => {
            error!("CRITICAL: Extension controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Extension controller exited unexpectedly without error")
        }
        result = replication.run(Api::<DNSEntry>::all(client)) => {
            error!("CRITICAL: DNS entry replication exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DNS entry replication exited unexpectedly without error")
        }
        () = lost_leadership(leadership.as_mut()) => {
            metrics::record_leader(false);
            anyhow::bail!("Lost leadership, exiting")
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}

/// Block until this instance holds the lease.
async fn acquire_leadership(client: Client, args: &Args) -> Result<tokio::sync::watch::Receiver<bool>> {
    let mut builder = LeaseManagerBuilder::new(client, &args.lease_name)
        .with_namespace(&args.lease_namespace)
        .with_duration(DEFAULT_LEASE_DURATION_SECS)
        .with_grace(DEFAULT_LEASE_GRACE_SECS);
    if let Some(identity) = &args.identity {
        builder = builder.with_identity(identity);
    }
    let manager = builder.build().await?;

    let (mut channel, task) = manager.watch().await;
    // The lease is renewed by the task for as long as the channel lives.
    drop(task);

    info!(lease = %args.lease_name, namespace = %args.lease_namespace, "Waiting for leadership");
    while !*channel.borrow_and_update() {
        channel.changed().await?;
    }
    info!(lease = %args.lease_name, "Acquired leadership");
    Ok(channel)
}

/// Resolve when leadership is lost; never resolves without leader election.
async fn lost_leadership(channel: Option<&mut tokio::sync::watch::Receiver<bool>>) {
    let Some(channel) = channel else {
        return std::future::pending().await;
    };
    loop {
        if channel.changed().await.is_err() {
            warn!("Lease manager stopped");
            return;
        }
        if !*channel.borrow_and_update() {
            warn!("Leadership lost");
            return;
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));
    let address = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, path = METRICS_SERVER_PATH, "Serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Run the `Extension` controller
async fn run_extension_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Extension controller");

    let api = Api::<Extension>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_extension, error_policy, ctx)
        .for_each(|result| {
            if let Err(e) = result {
                debug!(error = %e, "Extension reconciliation failed");
            }
            futures::future::ready(())
        })
        .await;

    Ok(())
}

/// Reconcile wrapper for `Extension`
async fn reconcile_extension(
    extension: Arc<Extension>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    if extension.spec.type_ != EXTENSION_TYPE {
        return Ok(Action::await_change());
    }

    let phase = phase_of(&extension);
    debug!(
        extension = %extension.name_any(),
        namespace = ?extension.namespace(),
        ?phase,
        "Reconcile wrapper called for Extension"
    );

    let result = dispatch(&ctx, &extension, phase).await;
    match result {
        Ok(action) => {
            info!(namespace = ?extension.namespace(), ?phase, "Extension handled");
            Ok(action)
        }
        Err(e) => {
            error!(namespace = ?extension.namespace(), ?phase, error = %format!("{e:#}"), "Failed to handle Extension");
            Err(e.into())
        }
    }
}

async fn dispatch(ctx: &Context, extension: &Extension, phase: Phase) -> Result<Action> {
    let client = &ctx.client;
    match phase {
        Phase::Delete | Phase::ForceDelete => {
            if !has_finalizer(extension, FINALIZER_EXTENSION) {
                return Ok(Action::await_change());
            }
            if phase == Phase::ForceDelete {
                ctx.actuator.force_delete(extension).await?;
            } else {
                ctx.actuator.delete(extension).await?;
            }
            remove_finalizer(client, extension, FINALIZER_EXTENSION).await?;
            Ok(Action::await_change())
        }
        Phase::Migrate => {
            ctx.actuator.migrate(extension).await?;
            remove_annotation(client, extension, ANNOTATION_OPERATION).await?;
            remove_finalizer(client, extension, FINALIZER_EXTENSION).await?;
            Ok(Action::await_change())
        }
        Phase::Restore => {
            ensure_finalizer(client, extension, FINALIZER_EXTENSION).await?;
            ctx.actuator.restore(extension).await?;
            remove_annotation(client, extension, ANNOTATION_OPERATION).await?;
            Ok(Action::requeue(Duration::from_secs(SUCCESS_REQUEUE_DURATION_SECS)))
        }
        Phase::Reconcile => {
            ensure_finalizer(client, extension, FINALIZER_EXTENSION).await?;
            ctx.actuator.reconcile(extension).await?;
            if extension.annotations().get(ANNOTATION_OPERATION).map(String::as_str) == Some(OPERATION_RECONCILE) {
                remove_annotation(client, extension, ANNOTATION_OPERATION).await?;
            }
            Ok(Action::requeue(Duration::from_secs(SUCCESS_REQUEUE_DURATION_SECS)))
        }
    }
}

/// Error policy for the `Extension` controller
fn error_policy(_extension: Arc<Extension>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    Action::requeue(requeue_after_error(&err.0))
}
