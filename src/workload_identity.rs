// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload identity configurations for DNS provider credentials.
//!
//! A DNS provider may reference a workload identity instead of a static secret.
//! The identity's provider configuration depends on the target system, so it is
//! modelled as a tagged union: each variant decodes, validates and diffs its own
//! configuration, and callers dispatch with a plain `match`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label on a workload identity secret naming its target system.
pub const LABEL_TARGET_SYSTEM: &str = "workloadidentity.security.gardener.cloud/provider";

/// Data key of the serialized provider configuration in a workload identity secret.
pub const CONFIG_DATA_KEY: &str = "config";

/// Cloud system a workload identity federates with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetSystem {
    /// Amazon Web Services
    Aws,
    /// Microsoft Azure
    Azure,
    /// Google Cloud Platform
    Gcp,
}

impl TargetSystem {
    /// Target system serving a DNS provider type, if the type supports workload identity.
    #[must_use]
    pub fn for_provider_type(provider_type: &str) -> Option<Self> {
        match provider_type {
            "aws-route53" => Some(Self::Aws),
            "azure-dns" | "azure-private-dns" => Some(Self::Azure),
            "google-clouddns" => Some(Self::Gcp),
            _ => None,
        }
    }
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        };
        f.write_str(name)
    }
}

impl FromStr for TargetSystem {
    type Err = WorkloadIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            other => Err(WorkloadIdentityError::UnsupportedTargetSystem(other.to_string())),
        }
    }
}

/// Errors while decoding or validating a workload identity configuration.
#[derive(Error, Debug)]
pub enum WorkloadIdentityError {
    /// The target system is not supported for DNS providers.
    #[error("unsupported workload identity target system '{0}'")]
    UnsupportedTargetSystem(String),

    /// The configuration does not decode for the target system.
    #[error("failed to decode {target} workload identity config: {source}")]
    Decode {
        /// Target system the config was decoded for
        target: TargetSystem,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// The configuration decoded but has invalid fields.
    #[error("invalid {target} workload identity config: {}", .errors.join("; "))]
    Invalid {
        /// Target system of the config
        target: TargetSystem,
        /// Field errors
        errors: Vec<String>,
    },
}

/// AWS workload identity configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsConfig {
    /// Role assumed through web identity federation.
    #[serde(rename = "roleARN", default)]
    pub role_arn: String,
}

/// Azure workload identity configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureConfig {
    /// Application (client) id.
    #[serde(rename = "clientID", default)]
    pub client_id: String,
    /// Directory (tenant) id.
    #[serde(rename = "tenantID", default)]
    pub tenant_id: String,
    /// Subscription id.
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: String,
}

/// GCP workload identity configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcpConfig {
    /// Project id.
    #[serde(rename = "projectID", default)]
    pub project_id: String,
    /// External account credentials configuration.
    #[serde(default)]
    pub credentials_config: Option<serde_json::Value>,
}

/// Provider configuration of a workload identity, keyed by target system.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadIdentityConfig {
    /// AWS
    Aws(AwsConfig),
    /// Azure
    Azure(AzureConfig),
    /// GCP
    Gcp(GcpConfig),
}

impl WorkloadIdentityConfig {
    /// Decode a configuration for the given target system.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadIdentityError::Decode`] if the payload does not match the
    /// target system's schema.
    pub fn decode(target: TargetSystem, raw: &[u8]) -> Result<Self, WorkloadIdentityError> {
        let decode_err = |source| WorkloadIdentityError::Decode { target, source };
        Ok(match target {
            TargetSystem::Aws => Self::Aws(serde_json::from_slice(raw).map_err(decode_err)?),
            TargetSystem::Azure => Self::Azure(serde_json::from_slice(raw).map_err(decode_err)?),
            TargetSystem::Gcp => Self::Gcp(serde_json::from_slice(raw).map_err(decode_err)?),
        })
    }

    /// Target system of this configuration.
    #[must_use]
    pub fn target(&self) -> TargetSystem {
        match self {
            Self::Aws(_) => TargetSystem::Aws,
            Self::Azure(_) => TargetSystem::Azure,
            Self::Gcp(_) => TargetSystem::Gcp,
        }
    }

    /// Validate field contents, returning every problem found.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            Self::Aws(cfg) => {
                if cfg.role_arn.is_empty() {
                    errors.push("roleARN: required".to_string());
                } else if !cfg.role_arn.starts_with("arn:") {
                    errors.push(format!("roleARN: '{}' is not an ARN", cfg.role_arn));
                }
            }
            Self::Azure(cfg) => {
                for (field, value) in [
                    ("clientID", &cfg.client_id),
                    ("tenantID", &cfg.tenant_id),
                    ("subscriptionID", &cfg.subscription_id),
                ] {
                    if value.is_empty() {
                        errors.push(format!("{field}: required"));
                    }
                }
            }
            Self::Gcp(cfg) => {
                if cfg.project_id.is_empty() {
                    errors.push("projectID: required".to_string());
                }
                match &cfg.credentials_config {
                    None => errors.push("credentialsConfig: required".to_string()),
                    Some(c) if !c.is_object() => {
                        errors.push("credentialsConfig: must be an object".to_string());
                    }
                    Some(_) => {}
                }
            }
        }
        errors
    }

    /// Validate a change from `old` to `self`, rejecting edits of immutable fields.
    #[must_use]
    pub fn validate_update(&self, old: &Self) -> Vec<String> {
        match (old, self) {
            (Self::Aws(_), Self::Aws(_)) => Vec::new(),
            (Self::Azure(old), Self::Azure(new)) => {
                let mut errors = Vec::new();
                if old.tenant_id != new.tenant_id {
                    errors.push("tenantID: field is immutable".to_string());
                }
                if old.subscription_id != new.subscription_id {
                    errors.push("subscriptionID: field is immutable".to_string());
                }
                errors
            }
            (Self::Gcp(old), Self::Gcp(new)) => {
                if old.project_id == new.project_id {
                    Vec::new()
                } else {
                    vec!["projectID: field is immutable".to_string()]
                }
            }
            (old, new) => vec![format!(
                "target system changed from {} to {}",
                old.target(),
                new.target()
            )],
        }
    }

    /// Decode and validate in one step.
    ///
    /// # Errors
    ///
    /// Returns a decode error or [`WorkloadIdentityError::Invalid`] with all field errors.
    pub fn decode_valid(target: TargetSystem, raw: &[u8]) -> Result<Self, WorkloadIdentityError> {
        let config = Self::decode(target, raw)?;
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(WorkloadIdentityError::Invalid { target, errors })
        }
    }

    /// Serialize back to JSON, used to remember the config on the provider object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Aws(cfg) => serde_json::to_string(cfg),
            Self::Azure(cfg) => serde_json::to_string(cfg),
            Self::Gcp(cfg) => serde_json::to_string(cfg),
        }
    }
}

#[cfg(test)]
#[path = "workload_identity_tests.rs"]
mod workload_identity_tests;
