// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic deploy/wait/destroy for objects converged by an external controller.
//!
//! A [`Deployable`] is written with a maintainer marker and a timestamp
//! annotation. The timestamp lets the readiness check tell a fresh observation
//! from a stale cached copy: an object only counts as ready once it carries the
//! timestamp just written.
//!
//! [`converge`] runs all deployments and destructions of one pass concurrently
//! and reports every failure, without cancelling the others.

use crate::constants::SERVICE_NAME;
use crate::errors::aggregate;
use crate::labels::{ANNOTATION_MAINTAINER, ANNOTATION_TIMESTAMP};
use crate::metrics;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// An object that can be deployed, awaited and destroyed.
#[async_trait]
pub trait Deployable: Send + Sync {
    /// Human-readable identity used in logs and errors.
    fn describe(&self) -> String;

    /// Create or update the object. Returns the timestamp written on it.
    async fn deploy(&self) -> Result<String>;

    /// Wait until the object reports ready for the given timestamp.
    async fn wait_ready(&self, timestamp: &str) -> Result<()>;

    /// Request deletion of the object.
    async fn destroy(&self) -> Result<()>;

    /// Wait until the object is gone.
    async fn wait_deleted(&self) -> Result<()>;
}

/// Next value of the timestamp annotation.
///
/// Strictly greater than `previous` even if the clock did not advance, so a
/// redeploy within the same instant is still distinguishable.
#[must_use]
pub fn next_timestamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let floor = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc) + TimeDelta::nanoseconds(1));
    let stamp = match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    };
    stamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Set the maintainer marker and timestamp annotation on `annotations`.
pub fn stamp(annotations: &mut BTreeMap<String, String>, timestamp: &str) {
    annotations.insert(ANNOTATION_MAINTAINER.to_string(), SERVICE_NAME.to_string());
    annotations.insert(ANNOTATION_TIMESTAMP.to_string(), timestamp.to_string());
}

/// Deploy an object and wait until it is ready.
///
/// # Errors
///
/// Returns the deployment or wait error, annotated with the object identity.
pub async fn deploy_and_wait(object: &dyn Deployable) -> Result<()> {
    let what = object.describe();
    let result = async {
        let timestamp = object.deploy().await?;
        debug!(object = %what, timestamp = %timestamp, "Deployed, waiting for readiness");
        object.wait_ready(&timestamp).await
    }
    .await
    .with_context(|| format!("deploying {what}"));

    metrics::record_provider_action("deploy", result.is_ok());
    if result.is_ok() {
        info!(object = %what, "Deployed and ready");
    }
    result
}

/// Destroy an object and wait until it is gone.
///
/// # Errors
///
/// Returns the deletion or wait error, annotated with the object identity.
pub async fn destroy_and_wait(object: &dyn Deployable) -> Result<()> {
    let what = object.describe();
    let result = async {
        object.destroy().await?;
        object.wait_deleted().await
    }
    .await
    .with_context(|| format!("destroying {what}"));

    metrics::record_provider_action("destroy", result.is_ok());
    if result.is_ok() {
        info!(object = %what, "Destroyed");
    }
    result
}

/// Deploy and destroy the given objects concurrently.
///
/// All operations run to completion; failures are aggregated.
///
/// # Errors
///
/// Returns the single failure, or an aggregate of all failures.
pub async fn converge(
    deploy: Vec<Box<dyn Deployable>>,
    destroy: Vec<Box<dyn Deployable>>,
) -> Result<()> {
    let mut tasks: Vec<BoxFuture<'_, Result<()>>> = Vec::with_capacity(deploy.len() + destroy.len());
    for object in &deploy {
        tasks.push(deploy_and_wait(object.as_ref()).boxed());
    }
    for object in &destroy {
        tasks.push(destroy_and_wait(object.as_ref()).boxed());
    }

    let errors: Vec<anyhow::Error> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();
    aggregate(errors)
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod deploy_tests;
