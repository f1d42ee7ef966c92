// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{Extension, ExtensionSpec};
    use serde_json::json;

    fn extension_with(provider_config: Option<serde_json::Value>) -> Extension {
        Extension::new(
            "shoot-dns-service",
            ExtensionSpec {
                type_: "shoot-dns-service".to_string(),
                provider_config,
            },
        )
    }

    #[test]
    fn test_missing_provider_config_is_default() {
        let config = DnsConfig::from_extension(&extension_with(None)).unwrap();
        assert_eq!(config, DnsConfig::default());
        assert!(!config.sync_providers_from_shoot());
    }

    #[test]
    fn test_decode_full_provider_config() {
        let ext = extension_with(Some(json!({
            "apiVersion": "service.dns.extensions.gardener.cloud/v1alpha1",
            "kind": "DNSConfig",
            "providers": [{
                "type": "aws-route53",
                "secretName": "route53-creds",
                "domains": {"include": ["example.com"], "exclude": ["private.example.com"]},
                "zones": {"include": ["Z123"]}
            }],
            "syncProvidersFromShootSpecDNS": true,
            "dnsProviderReplication": {"enabled": true}
        })));

        let config = DnsConfig::from_extension(&ext).unwrap();
        assert_eq!(config.providers.len(), 1);
        let provider = &config.providers[0];
        assert_eq!(provider.type_.as_deref(), Some("aws-route53"));
        assert_eq!(provider.secret_name.as_deref(), Some("route53-creds"));
        assert_eq!(
            provider.domains.as_ref().unwrap().exclude,
            vec!["private.example.com".to_string()]
        );
        assert!(provider.zones.as_ref().unwrap().exclude.is_empty());
        assert!(!provider.is_primary());
        assert!(config.sync_providers_from_shoot());
        assert!(config.replication_enabled(false));
    }

    #[test]
    fn test_replication_falls_back_to_service_default() {
        let config = DnsConfig::default();
        assert!(config.replication_enabled(true));
        assert!(!config.replication_enabled(false));
    }

    #[test]
    fn test_malformed_provider_config_is_an_error() {
        let ext = extension_with(Some(json!({"providers": "not-a-list"})));
        let err = DnsConfig::from_extension(&ext).unwrap_err();
        assert!(err.to_string().contains("provider config"));
    }

    #[test]
    fn test_default_timing_ceilings() {
        let timing = Timing::default();
        assert_eq!(timing.bundle_delete_timeout, std::time::Duration::from_secs(120));
        assert_eq!(timing.restore_pending_timeout, std::time::Duration::from_secs(180));
        assert!(timing.entry_drain_attempts > 0);
    }
}
