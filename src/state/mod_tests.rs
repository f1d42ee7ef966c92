// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the state synchronizer

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::labels::{ANNOTATION_LAST_APPLIED, IGNORE_FULL, OPERATION_RECONCILE};
    use crate::test_support::{entry, extension, FakeSeedStore, EXTENSION_NAME, NAMESPACE, SHOOT_ID};

    fn manager(store: &Arc<FakeSeedStore>) -> StateManager {
        StateManager::new(
            Arc::clone(store) as Arc<dyn SeedStore>,
            NAMESPACE,
            EXTENSION_NAME,
            SHOOT_ID,
        )
    }

    fn names(state: &StateManager) -> Vec<&str> {
        state.entries().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_ensure_entries_is_idempotent() {
        let store = FakeSeedStore::new();
        let mut state = manager(&store);
        let live = vec![entry("a", "a.example.com"), entry("b", "b.example.com")];

        assert!(state.ensure_entries(&live));
        assert!(!state.ensure_entries(&live));
    }

    #[test]
    fn test_ensure_entries_against_prior_snapshots() {
        let store = FakeSeedStore::new();
        let a = entry("a", "a.example.com");
        let b = entry("b", "b.example.com");
        let c = entry("c", "c.example.com");
        let live = vec![a.clone(), b.clone()];

        // {a, b} against {a, b}
        let mut state = manager(&store);
        state.ensure_entries(&live);
        assert!(!state.ensure_entries(&[b.clone(), a.clone()]));

        // {a, b} against {a}
        let mut state = manager(&store);
        state.ensure_entries(std::slice::from_ref(&a));
        assert!(state.ensure_entries(&live));
        assert_eq!(names(&state), vec!["a", "b"]);

        // {a, b} against {a, c}
        let mut state = manager(&store);
        state.ensure_entries(&[a.clone(), c]);
        assert!(state.ensure_entries(&live));
        assert_eq!(names(&state), vec!["a", "b"]);
    }

    #[test]
    fn test_ensure_entries_detects_spec_label_and_annotation_changes() {
        let store = FakeSeedStore::new();
        let mut state = manager(&store);
        let mut a = entry("a", "a.example.com");
        state.ensure_entries(std::slice::from_ref(&a));

        a.spec.targets = Some(vec!["10.0.0.2".to_string()]);
        assert!(state.ensure_entries(std::slice::from_ref(&a)));

        a.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("tier".to_string(), "edge".to_string());
        assert!(state.ensure_entries(std::slice::from_ref(&a)));

        a.metadata.annotations = Some(BTreeMap::from([(
            "dns.gardener.cloud/class".to_string(),
            "garden".to_string(),
        )]));
        assert!(state.ensure_entries(std::slice::from_ref(&a)));
        assert!(!state.ensure_entries(std::slice::from_ref(&a)));
        assert_eq!(
            state.entry("a").unwrap().spec.targets,
            Some(vec!["10.0.0.2".to_string()])
        );
    }

    #[test]
    fn test_last_applied_annotation_is_not_captured() {
        let mut a = entry("a", "a.example.com");
        a.metadata.annotations = Some(BTreeMap::from([
            (ANNOTATION_LAST_APPLIED.to_string(), "{...}".to_string()),
            ("keep".to_string(), "me".to_string()),
        ]));
        let captured = EntryState::from_entry(&a);
        assert_eq!(
            captured.annotations,
            BTreeMap::from([("keep".to_string(), "me".to_string())])
        );
    }

    #[test]
    fn test_single_entry_upsert_and_delete() {
        let store = FakeSeedStore::new();
        let mut state = manager(&store);

        assert!(state.ensure_entry_for(&entry("a", "a.example.com")));
        assert!(!state.ensure_entry_for(&entry("a", "a.example.com")));
        assert!(state.is_dirty());

        assert!(state.ensure_entry_deleted("a"));
        assert!(!state.ensure_entry_deleted("a"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_resurrected_entry_drops_migration_markers() {
        let mut a = entry("a", "a.example.com");
        a.metadata.annotations = Some(BTreeMap::from([
            (ANNOTATION_IGNORE.to_string(), IGNORE_FULL.to_string()),
            (ANNOTATION_OPERATION.to_string(), OPERATION_RECONCILE.to_string()),
            ("keep".to_string(), "me".to_string()),
        ]));
        let rebuilt = EntryState::from_entry(&a).to_entry("other-namespace");

        assert_eq!(rebuilt.metadata.namespace.as_deref(), Some("other-namespace"));
        assert_eq!(rebuilt.spec, a.spec);
        assert_eq!(rebuilt.labels(), a.labels());
        assert_eq!(
            rebuilt.annotations(),
            &BTreeMap::from([("keep".to_string(), "me".to_string())])
        );
    }

    #[tokio::test]
    async fn test_update_persists_compressed_state_and_clears_dirty() {
        let store = FakeSeedStore::new();
        store.insert_extension(extension(None));
        let mut state = manager(&store);

        state.update("noop").await.unwrap();
        assert_eq!(store.with(|s| s.persist_calls), 0, "clean state is not written");

        state.ensure_entries(&[entry("a", "a.example.com"), entry("b", "b.example.com")]);
        state.update("test").await.unwrap();
        assert!(!state.is_dirty());

        let persisted = store
            .extension(NAMESPACE, EXTENSION_NAME)
            .and_then(|e| e.status)
            .and_then(|s| s.state)
            .unwrap();
        assert!(persisted.get("compressedState").is_some());

        let decoded = DNSState::from_persisted(&persisted).unwrap().unwrap();
        assert_eq!(decoded.entries.len(), 2);

        state.update("again").await.unwrap();
        assert_eq!(store.with(|s| s.persist_calls), 1);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_dirty() {
        let store = FakeSeedStore::new();
        store.insert_extension(extension(None));
        store.with(|s| s.fail_persist = true);
        let mut state = manager(&store);

        state.ensure_entry_for(&entry("a", "a.example.com"));
        assert!(state.update("test").await.is_err());
        assert!(state.is_dirty());

        store.with(|s| s.fail_persist = false);
        state.update("retry").await.unwrap();
        assert!(!state.is_dirty());
    }

    #[tokio::test]
    async fn test_load_round_trips_and_accepts_legacy_raw_state() {
        let store = FakeSeedStore::new();
        store.insert_extension(extension(None));
        let mut state = manager(&store);
        state.ensure_entries(&[entry("a", "a.example.com")]);
        state.update("test").await.unwrap();

        let persisted = store.extension(NAMESPACE, EXTENSION_NAME).unwrap();
        let mut reloaded = manager(&store);
        reloaded.load(&persisted);
        assert_eq!(names(&reloaded), vec!["a"]);
        assert!(!reloaded.is_dirty());

        let mut legacy = extension(None);
        legacy.status = Some(crate::crd::ExtensionStatus {
            state: Some(serde_json::to_value(DNSState {
                entries: vec![EntryState::from_entry(&entry("x", "x.example.com"))],
            })
            .unwrap()),
            ..Default::default()
        });
        let mut from_legacy = manager(&store);
        from_legacy.load(&legacy);
        assert_eq!(names(&from_legacy), vec!["x"]);
    }

    #[tokio::test]
    async fn test_undecodable_state_is_discarded_and_marked_dirty() {
        let store = FakeSeedStore::new();
        let mut broken = extension(None);
        broken.status = Some(crate::crd::ExtensionStatus {
            state: Some(serde_json::json!({ "compressedState": "bm90IGd6aXA=" })),
            ..Default::default()
        });
        store.insert_extension(broken.clone());
        store.insert_entry(entry("live", "live.example.com"));

        let mut state = manager(&store);
        state.load(&broken);
        assert!(state.is_empty());
        assert!(state.is_dirty());

        state.refresh(RefreshMode::Exact).await.unwrap();
        assert_eq!(names(&state), vec!["live"]);
    }

    #[tokio::test]
    async fn test_refresh_only_sees_the_tenant_entries() {
        let store = FakeSeedStore::new();
        store.insert_entry(entry("mine", "mine.example.com"));
        let mut foreign = entry("foreign", "foreign.example.com");
        foreign.metadata.labels = Some(BTreeMap::from([(
            LABEL_SHOOT_ID.to_string(),
            "someone-else".to_string(),
        )]));
        store.insert_entry(foreign);

        let mut state = manager(&store);
        assert!(state.refresh(RefreshMode::Exact).await.unwrap());
        assert_eq!(names(&state), vec!["mine"]);
    }

    #[tokio::test]
    async fn test_keep_missing_refresh_only_adds() {
        let store = FakeSeedStore::new();
        store.insert_entry(entry("a", "a.example.com"));
        store.insert_entry(entry("b", "b.example.com"));
        let mut state = manager(&store);
        state.refresh(RefreshMode::Exact).await.unwrap();

        store.remove_entry(NAMESPACE, "a");
        store.insert_entry(entry("c", "c.example.com"));
        assert!(state.refresh(RefreshMode::KeepMissing).await.unwrap());
        assert_eq!(names(&state), vec!["a", "b", "c"]);

        store.remove_entry(NAMESPACE, "b");
        store.remove_entry(NAMESPACE, "c");
        assert!(!state.refresh(RefreshMode::KeepMissing).await.unwrap());
        assert_eq!(names(&state), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_drop_all_entries_persists_no_state() {
        let store = FakeSeedStore::new();
        store.insert_extension(extension(None));
        let mut state = manager(&store);
        state.ensure_entries(&[entry("a", "a.example.com")]);
        state.update("fill").await.unwrap();

        state.drop_all_entries();
        state.update("drop").await.unwrap();
        let persisted = store
            .extension(NAMESPACE, EXTENSION_NAME)
            .and_then(|e| e.status)
            .and_then(|s| s.state);
        assert!(persisted.is_none());
    }
}
