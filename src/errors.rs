// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the DNS add-on lifecycle.
//!
//! Reconcilers return `anyhow::Result`; the variants here are the ones callers
//! need to recognize (via `downcast_ref`) to pick a requeue strategy or to
//! tolerate a failure in best-effort phases.
//!
//! | Category | Variant | Handling |
//! |---|---|---|
//! | Validation | [`ActuatorError::InvalidProviders`] | reported once per attempt |
//! | Transient | [`ActuatorError::Timeout`], [`ActuatorError::LockBusy`] | standard requeue |
//! | Stuck state | [`ActuatorError::EntriesStuck`] | requeue after fixed backoff |
//! | Provider | [`ProviderError`] | retried while waiting, fatal at deadline |

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the lifecycle actuator and its components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// One or more provider declarations are invalid. All problems are listed.
    #[error("invalid DNS provider configuration: {}", .0.join("; "))]
    InvalidProviders(Vec<String>),

    /// DNS entries did not finish deleting within the polling budget.
    #[error("{count} DNS entries are still present after deletion: {summary}")]
    EntriesStuck {
        /// Number of residual entries
        count: usize,
        /// Which providers are stuck and why
        summary: String,
        /// Suggested backoff before the next attempt
        retry_after: Duration,
    },

    /// A bounded wait reached its deadline.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// How long the wait lasted
        waited: Duration,
    },

    /// The tenant's state lock could not be acquired.
    #[error("state of namespace {0} is locked by a concurrent update")]
    LockBusy(String),

    /// Several independent operations failed.
    #[error("{} operations failed: {}", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),
}

impl ActuatorError {
    /// Requeue delay the caller should honour, if the error carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::EntriesStuck { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Errors observed while waiting for a DNS provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider reports an error; retriable because credentials or quotas may recover.
    #[error("DNS provider {name} has state Error: {message}")]
    Failed {
        /// Provider name
        name: String,
        /// Status message
        message: String,
    },

    /// The provider configuration was rejected by the DNS controller.
    #[error("DNS provider {name} has state Invalid: {message}")]
    Invalid {
        /// Provider name
        name: String,
        /// Status message
        message: String,
    },

    /// The provider has not been processed yet (stale observation or other state).
    #[error("DNS provider {name} is not ready yet (state {state})")]
    NotReady {
        /// Provider name
        name: String,
        /// Observed state
        state: String,
    },
}

/// Extract the stuck-entries backoff from an `anyhow` error chain.
#[must_use]
pub fn stuck_retry_after(err: &anyhow::Error) -> Option<Duration> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ActuatorError>())
        .and_then(ActuatorError::retry_after)
}

/// Whether an error chain contains an [`ActuatorError::EntriesStuck`].
#[must_use]
pub fn is_entries_stuck(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ActuatorError>(),
            Some(ActuatorError::EntriesStuck { .. })
        )
    })
}

/// Collapse a list of independent failures into one error, or `Ok` if none failed.
///
/// # Errors
///
/// Returns the single error unchanged, or [`ActuatorError::Aggregate`] for several.
pub fn aggregate(mut errors: Vec<anyhow::Error>) -> anyhow::Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ActuatorError::Aggregate(errors.iter().map(|e| format!("{e:#}")).collect()).into()),
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
