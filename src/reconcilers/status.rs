// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `lastOperation` reporting on `Extension` resources.
//!
//! Every lifecycle operation reports `Processing` when it starts and `Succeeded`
//! or `Error` when it ends. The description carries the error chain on failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use shoot_dns_service::reconcilers::status::{last_operation, OperationState, OperationType};
//!
//! let op = last_operation(OperationType::Reconcile, OperationState::Succeeded, "done");
//! assert_eq!(op.progress, 100);
//! ```

use crate::crd::LastOperation;
use crate::errors::ActuatorError;
use crate::store::SeedStore;
use chrono::{SecondsFormat, Utc};
use std::fmt;
use tracing::warn;

/// Lifecycle operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    /// Converge to the desired state
    Reconcile,
    /// Tear down
    Delete,
    /// Hand over to another control plane
    Migrate,
    /// Take over from another control plane
    Restore,
}

impl OperationType {
    /// Label used in metrics.
    #[must_use]
    pub fn metric_label(self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Delete => "delete",
            Self::Migrate => "migrate",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reconcile => "Reconcile",
            Self::Delete => "Delete",
            Self::Migrate => "Migrate",
            Self::Restore => "Restore",
        })
    }
}

/// Progress of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    /// Started, not finished
    Processing,
    /// Finished successfully
    Succeeded,
    /// Failed, will be retried
    Error,
    /// Failed on invalid configuration, needs a change by the user
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Processing => "Processing",
            Self::Succeeded => "Succeeded",
            Self::Error => "Error",
            Self::Failed => "Failed",
        })
    }
}

/// Build a `lastOperation` stamped with the current time.
#[must_use]
pub fn last_operation(
    operation: OperationType,
    state: OperationState,
    description: &str,
) -> LastOperation {
    LastOperation {
        type_: operation.to_string(),
        state: state.to_string(),
        description: description.to_string(),
        last_update_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        progress: match state {
            OperationState::Processing => 1,
            OperationState::Succeeded => 100,
            OperationState::Error | OperationState::Failed => 0,
        },
    }
}

/// Build the final `lastOperation` for an operation outcome.
#[must_use]
pub fn outcome(operation: OperationType, result: &anyhow::Result<()>) -> LastOperation {
    match result {
        Ok(()) => last_operation(
            operation,
            OperationState::Succeeded,
            &format!("{operation} of DNS add-on succeeded"),
        ),
        Err(e) => {
            let state = match e.downcast_ref::<ActuatorError>() {
                Some(ActuatorError::InvalidProviders(_)) => OperationState::Failed,
                _ => OperationState::Error,
            };
            last_operation(operation, state, &format!("{e:#}"))
        }
    }
}

/// Write a `lastOperation`. Failures are logged, not returned, so they never
/// mask the outcome of the operation itself.
pub async fn report(store: &dyn SeedStore, namespace: &str, name: &str, operation: &LastOperation) {
    if let Err(e) = store.patch_last_operation(namespace, name, operation).await {
        warn!(namespace, extension = name, error = %e, "Failed to update lastOperation");
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
