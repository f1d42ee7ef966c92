// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pagination.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_first_page_sets_limit_and_keeps_selector() {
        let base = ListParams::default().labels("gardener.cloud/shoot-id=shoot--dev--app");
        let params = first_page(base);

        assert_eq!(params.limit, Some(KUBE_LIST_PAGE_SIZE));
        assert_eq!(params.continue_token, None);
        assert_eq!(
            params.label_selector.as_deref(),
            Some("gardener.cloud/shoot-id=shoot--dev--app")
        );
    }

    #[test]
    fn test_first_page_discards_stale_token() {
        let base = ListParams {
            continue_token: Some("stale".to_string()),
            ..Default::default()
        };
        assert_eq!(first_page(base).continue_token, None);
    }

    #[test]
    fn test_next_page_follows_continue_token() {
        let params = first_page(ListParams::default().labels("a=b"));

        let next = next_page(&params, Some("token-2".to_string())).unwrap();
        assert_eq!(next.continue_token.as_deref(), Some("token-2"));
        assert_eq!(next.limit, params.limit);
        assert_eq!(next.label_selector, params.label_selector);
    }

    #[test]
    fn test_last_page_has_no_or_empty_token() {
        let params = first_page(ListParams::default());
        assert!(next_page(&params, None).is_none());
        assert!(next_page(&params, Some(String::new())).is_none());
    }
}
