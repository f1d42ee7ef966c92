// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Writes the CRDs of the resources this operator reads and writes to
//! deploy/crds/, so local clusters and tests can install them.
//!
//! Usage:
//!   cargo run --bin crdgen

use kube::CustomResourceExt;
use shoot_dns_service::crd::{Cluster, DNSEntry, DNSProvider, DNSRecord, Extension, ManagedResource};
use std::fs;
use std::path::Path;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = Path::new("deploy/crds");
    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd.rs...");

    generate_crd::<Extension>(output_dir)?;
    generate_crd::<Cluster>(output_dir)?;
    generate_crd::<DNSEntry>(output_dir)?;
    generate_crd::<DNSProvider>(output_dir)?;
    generate_crd::<DNSRecord>(output_dir)?;
    generate_crd::<ManagedResource>(output_dir)?;

    println!("✓ Successfully generated CRD YAML files in deploy/crds/");
    Ok(())
}

fn generate_crd<T>(output_dir: &Path) -> Result<(), Box<dyn std::error::Error>>
where
    T: CustomResourceExt,
{
    let crd = T::crd();
    let filename = format!("{}.crd.yaml", T::crd_name());

    let yaml = serde_yaml::to_string(&crd)?;
    let content = format!("{COPYRIGHT_HEADER}{yaml}");

    fs::write(output_dir.join(&filename), content)?;
    println!("  ✓ Generated {filename}");

    Ok(())
}
