// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic of the DNS add-on.
//!
//! # Components
//!
//! - [`actuator`] - lifecycle operations on one tenant (reconcile, delete,
//!   force-delete, migrate, restore)
//! - [`providers`] - desired DNS provider set and its convergence
//! - [`entries`] - DNS entry drain, freeze and resurrection
//! - [`replication`] - watch-driven mirroring of entry changes into the
//!   persisted snapshot
//! - [`deploy`] - deploy/wait/destroy abstraction with concurrent fan-out
//! - [`retry`] - API retries, jitter and the polling [`retry::Ticker`]
//! - [`status`] - `lastOperation` reporting
//! - [`finalizers`], [`resources`], [`pagination`] - Kubernetes object helpers
//!
//! The actuator and the replication reconciler share one
//! [`crate::state::lock::NamedLocks`] registry, so only one of them mutates a
//! tenant's snapshot at a time.

pub mod actuator;
pub mod deploy;
pub mod entries;
pub mod finalizers;
pub mod pagination;
pub mod providers;
pub mod replication;
pub mod resources;
pub mod retry;
pub mod status;

pub use actuator::{Actuator, ExtensionContext, OperatingMode};
pub use replication::{ReplicationReconciler, SyncOutcome};
