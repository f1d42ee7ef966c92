// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `workload_identity.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_target_system_parsing() {
        assert_eq!("aws".parse::<TargetSystem>().unwrap(), TargetSystem::Aws);
        assert_eq!("gcp".parse::<TargetSystem>().unwrap(), TargetSystem::Gcp);
        assert!(matches!(
            "openstack".parse::<TargetSystem>(),
            Err(WorkloadIdentityError::UnsupportedTargetSystem(s)) if s == "openstack"
        ));
    }

    #[test]
    fn test_target_system_for_provider_type() {
        assert_eq!(TargetSystem::for_provider_type("aws-route53"), Some(TargetSystem::Aws));
        assert_eq!(
            TargetSystem::for_provider_type("azure-private-dns"),
            Some(TargetSystem::Azure)
        );
        assert_eq!(TargetSystem::for_provider_type("cloudflare-dns"), None);
    }

    #[test]
    fn test_decode_and_validate_aws() {
        let cfg = WorkloadIdentityConfig::decode_valid(
            TargetSystem::Aws,
            br#"{"roleARN":"arn:aws:iam::123456789012:role/dns"}"#,
        )
        .unwrap();
        assert_eq!(cfg.target(), TargetSystem::Aws);

        let err = WorkloadIdentityConfig::decode_valid(TargetSystem::Aws, br#"{"roleARN":"dns"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("not an ARN"));
    }

    #[test]
    fn test_azure_reports_every_missing_field() {
        let cfg = WorkloadIdentityConfig::decode(TargetSystem::Azure, br#"{"clientID":"c"}"#).unwrap();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("tenantID")));
        assert!(errors.iter().any(|e| e.starts_with("subscriptionID")));
    }

    #[test]
    fn test_gcp_requires_credentials_object() {
        let cfg = WorkloadIdentityConfig::decode(
            TargetSystem::Gcp,
            br#"{"projectID":"p","credentialsConfig":"nope"}"#,
        )
        .unwrap();
        assert_eq!(cfg.validate(), vec!["credentialsConfig: must be an object".to_string()]);
    }

    #[test]
    fn test_decode_error_names_target() {
        let err = WorkloadIdentityConfig::decode(TargetSystem::Gcp, b"not json").unwrap_err();
        assert!(err.to_string().contains("gcp"));
    }

    #[test]
    fn test_immutable_fields() {
        let old = WorkloadIdentityConfig::Azure(AzureConfig {
            client_id: "a".into(),
            tenant_id: "t1".into(),
            subscription_id: "s".into(),
        });
        let mut changed = AzureConfig {
            client_id: "b".into(),
            tenant_id: "t1".into(),
            subscription_id: "s".into(),
        };
        assert!(WorkloadIdentityConfig::Azure(changed.clone())
            .validate_update(&old)
            .is_empty());

        changed.tenant_id = "t2".into();
        assert_eq!(
            WorkloadIdentityConfig::Azure(changed).validate_update(&old),
            vec!["tenantID: field is immutable".to_string()]
        );

        let aws = WorkloadIdentityConfig::Aws(AwsConfig {
            role_arn: "arn:x".into(),
        });
        assert_eq!(aws.validate_update(&old).len(), 1);
    }
}
