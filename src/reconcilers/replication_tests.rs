// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `replication.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::ExtensionStatus;
    use crate::state::{DNSState, EntryState};
    use crate::test_support::{cluster, entry, extension, FakeSeedStore, NAMESPACE};

    fn setup(hibernated: bool, snapshot: &[DNSEntry]) -> (Arc<FakeSeedStore>, ReplicationReconciler, Arc<NamedLocks>) {
        let store = FakeSeedStore::new();
        let mut ext = extension(None);
        if !snapshot.is_empty() {
            let state = DNSState {
                entries: snapshot.iter().map(EntryState::from_entry).collect(),
            };
            ext.status = Some(ExtensionStatus {
                state: state.to_persisted().unwrap(),
                ..Default::default()
            });
        }
        store.insert_extension(ext);
        store.insert_cluster(cluster(Some("app.dev.example.com"), hibernated));
        let locks = Arc::new(NamedLocks::new());
        let reconciler = ReplicationReconciler::new(store.clone(), Arc::clone(&locks));
        (store, reconciler, locks)
    }

    fn snapshot_names(store: &FakeSeedStore) -> Vec<String> {
        store
            .extension(NAMESPACE, EXTENSION_NAME)
            .and_then(|e| e.status)
            .and_then(|s| s.state)
            .and_then(|v| DNSState::from_persisted(&v).unwrap())
            .map(|s| s.entries.into_iter().map(|e| e.name).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_new_entry_is_added_once() {
        let (store, reconciler, _) = setup(false, &[]);
        store.insert_entry(entry("www", "www.app.dev.example.com"));

        assert_eq!(reconciler.sync_entry(NAMESPACE, "www").await.unwrap(), SyncOutcome::Updated);
        assert_eq!(snapshot_names(&store), vec!["www".to_string()]);

        assert_eq!(reconciler.sync_entry(NAMESPACE, "www").await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(store.with(|s| s.persist_calls), 1);
    }

    #[tokio::test]
    async fn test_changed_entry_is_updated() {
        let old = entry("www", "www.app.dev.example.com");
        let (store, reconciler, _) = setup(false, &[old]);
        store.insert_entry(entry("www", "web.app.dev.example.com"));

        assert_eq!(reconciler.sync_entry(NAMESPACE, "www").await.unwrap(), SyncOutcome::Updated);
        let persisted = store
            .extension(NAMESPACE, EXTENSION_NAME)
            .and_then(|e| e.status)
            .and_then(|s| s.state)
            .and_then(|v| DNSState::from_persisted(&v).unwrap())
            .unwrap();
        assert_eq!(persisted.entries[0].spec.dns_name, "web.app.dev.example.com");
    }

    #[tokio::test]
    async fn test_deleted_entry_is_removed() {
        let (store, reconciler, _) = setup(
            false,
            &[entry("a", "a.app.dev.example.com"), entry("b", "b.app.dev.example.com")],
        );
        store.insert_entry(entry("a", "a.app.dev.example.com"));

        assert_eq!(reconciler.sync_entry(NAMESPACE, "b").await.unwrap(), SyncOutcome::Updated);
        assert_eq!(snapshot_names(&store), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_deleting_entry_counts_as_deleted() {
        let (store, reconciler, _) = setup(false, &[entry("a", "a.app.dev.example.com")]);
        let mut deleting = entry("a", "a.app.dev.example.com");
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(k8s_openapi::jiff::Timestamp::now()),
        );
        store.insert_entry(deleting);

        assert_eq!(reconciler.sync_entry(NAMESPACE, "a").await.unwrap(), SyncOutcome::Updated);
        assert!(snapshot_names(&store).is_empty());
    }

    #[tokio::test]
    async fn test_drained_entries_of_hibernated_tenant_stay_in_snapshot() {
        let (store, reconciler, _) = setup(true, &[entry("a", "a.app.dev.example.com")]);

        assert_eq!(reconciler.sync_entry(NAMESPACE, "a").await.unwrap(), SyncOutcome::Skipped);
        assert_eq!(snapshot_names(&store), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_entry_of_other_tenant_is_not_captured() {
        let (store, reconciler, _) = setup(false, &[]);
        let mut foreign = entry("x", "x.other.example.com");
        foreign
            .labels_mut()
            .insert(LABEL_SHOOT_ID.to_string(), "shoot--other--x".to_string());
        store.insert_entry(foreign);

        assert_eq!(reconciler.sync_entry(NAMESPACE, "x").await.unwrap(), SyncOutcome::Unchanged);
        assert!(snapshot_names(&store).is_empty());
    }

    #[tokio::test]
    async fn test_namespace_without_extension_is_skipped() {
        let store = FakeSeedStore::new();
        store.insert_entry(entry("a", "a.example.com"));
        let reconciler = ReplicationReconciler::new(store.clone(), Arc::new(NamedLocks::new()));

        assert_eq!(reconciler.sync_entry(NAMESPACE, "a").await.unwrap(), SyncOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_busy_tenant_requeues_with_jitter() {
        let (store, reconciler, locks) = setup(false, &[]);
        store.insert_entry(entry("a", "a.app.dev.example.com"));
        let _held = locks.try_lock(NAMESPACE).unwrap();

        match reconciler.sync_entry(NAMESPACE, "a").await.unwrap() {
            SyncOutcome::Requeue(delay) => {
                assert!(delay >= Duration::from_millis(LOCK_JITTER_MIN_MILLIS));
                assert!(delay <= Duration::from_millis(LOCK_JITTER_MAX_MILLIS));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.with(|s| s.persist_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_event_applies_once_lock_is_free() {
        let (store, reconciler, locks) = setup(false, &[]);
        store.insert_entry(entry("a", "a.app.dev.example.com"));
        let held = locks.try_lock(NAMESPACE).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(held);
        });

        let outcome = reconciler.sync_with_requeue(NAMESPACE, "a").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(snapshot_names(&store), vec!["a".to_string()]);
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_gives_up_on_a_stuck_lock() {
        let (_store, reconciler, locks) = setup(false, &[]);
        let _held = locks.try_lock(NAMESPACE).unwrap();

        let err = reconciler.sync_with_requeue(NAMESPACE, "a").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<crate::errors::ActuatorError>(),
            Some(crate::errors::ActuatorError::LockBusy(_))
        ));
    }

    #[test]
    fn test_watch_events_map_to_entry_keys() {
        let e = entry("a", "a.example.com");
        assert_eq!(
            changed_entry(watcher::Event::Apply(e.clone())),
            Some((NAMESPACE.to_string(), "a".to_string()))
        );
        assert_eq!(
            changed_entry(watcher::Event::Delete(e.clone())),
            Some((NAMESPACE.to_string(), "a".to_string()))
        );
        assert_eq!(
            changed_entry(watcher::Event::InitApply(e)),
            Some((NAMESPACE.to_string(), "a".to_string()))
        );
        assert_eq!(changed_entry(watcher::Event::InitDone), None);

        let mut cluster_scoped = entry("b", "b.example.com");
        cluster_scoped.metadata.namespace = None;
        assert_eq!(changed_entry(watcher::Event::Apply(cluster_scoped)), None);
    }
}
