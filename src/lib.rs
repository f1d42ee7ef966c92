// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # shoot-dns-service - DNS add-on lifecycle operator
//!
//! Manages the DNS add-on of managed Kubernetes clusters ("shoots") whose
//! control planes run in namespaces of a shared host cluster ("seed").
//!
//! ## Overview
//!
//! For every tenant the operator:
//!
//! - deploys the DNS controller and its tenant-side resources as two resource bundles
//! - converges the tenant's `DNSProvider` objects from its DNS configuration
//! - keeps a compressed snapshot of the tenant's `DNSEntry` objects on the
//!   `Extension` status, so entries survive a move to another control plane
//! - drains entries and removes everything on deletion
//!
//! ## Modules
//!
//! - [`crd`] - custom resource types
//! - [`config`] - tenant DNS configuration and service configuration
//! - [`shoot`] - tenant descriptor decoded from the `Cluster` resource
//! - [`state`] - entry snapshot, its codec and the per-tenant lock registry
//! - [`store`], [`bundle`], [`shoot_access`] - access to the control plane,
//!   resource bundles and the tenant cluster
//! - [`reconcilers`] - lifecycle actuator and replication reconciler
//!
//! ## Example
//!
//! ```rust,no_run
//! use shoot_dns_service::config::ServiceConfig;
//! use shoot_dns_service::reconcilers::OperatingMode;
//!
//! let config = ServiceConfig {
//!     seed_id: "seed-eu-1".to_string(),
//!     ..Default::default()
//! };
//! assert_eq!(OperatingMode::Normal.replicas(false, config.use_next_generation_controller), 1);
//! ```

pub mod bundle;
pub mod config;
pub mod constants;
pub mod crd;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod shoot;
pub mod shoot_access;
pub mod state;
pub mod store;
pub mod workload_identity;

#[cfg(test)]
pub mod test_support;
