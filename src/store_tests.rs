// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_selector_string_is_sorted_and_comma_separated() {
        let selector = labels(&[("gardener.cloud/shoot-id", "abc"), ("app", "dns")]);
        assert_eq!(selector_string(&selector), "app=dns,gardener.cloud/shoot-id=abc");
        assert_eq!(selector_string(&Labels::new()), "");
    }

    #[test]
    fn test_matches_labels_requires_every_pair() {
        let selector = labels(&[("role", "managed-dns-provider")]);
        assert!(matches_labels(
            &selector,
            &labels(&[("role", "managed-dns-provider"), ("extra", "x")])
        ));
        assert!(!matches_labels(&selector, &labels(&[("role", "other")])));
        assert!(!matches_labels(&selector, &Labels::new()));
        assert!(matches_labels(&Labels::new(), &labels(&[("any", "thing")])));
    }

    #[test]
    fn test_state_patch_clears_legacy_raw_state() {
        let envelope = json!({ "compressedState": "H4sI" });
        assert_eq!(
            state_patch(Some(envelope)),
            json!({ "status": { "state": { "compressedState": "H4sI", "entries": null } } })
        );
    }

    #[test]
    fn test_state_patch_for_raw_and_empty_state() {
        let raw = json!({ "entries": [ { "name": "a" } ] });
        assert_eq!(
            state_patch(Some(raw.clone())),
            json!({ "status": { "state": raw } })
        );
        assert_eq!(state_patch(None), json!({ "status": { "state": null } }));
    }
}
