// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `deploy.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::errors::ActuatorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeTarget {
        name: &'static str,
        fail_deploy: bool,
        fail_destroy: bool,
        delay: Duration,
        log: Arc<AtomicUsize>,
    }

    impl FakeTarget {
        fn ok(name: &'static str, log: &Arc<AtomicUsize>) -> Box<dyn Deployable> {
            Box::new(Self {
                name,
                fail_deploy: false,
                fail_destroy: false,
                delay: Duration::from_secs(1),
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait]
    impl Deployable for FakeTarget {
        fn describe(&self) -> String {
            format!("target {}", self.name)
        }

        async fn deploy(&self) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            if self.fail_deploy {
                anyhow::bail!("{} refused", self.name);
            }
            Ok("2025-01-01T00:00:00.000000000Z".to_string())
        }

        async fn wait_ready(&self, _timestamp: &str) -> Result<()> {
            self.log.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail_destroy {
                anyhow::bail!("{} stuck", self.name);
            }
            Ok(())
        }

        async fn wait_deleted(&self) -> Result<()> {
            self.log.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_next_timestamp_uses_now_when_ahead() {
        let now = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_timestamp(None, now), "2025-03-01T10:00:00.000000000Z");
        assert_eq!(
            next_timestamp(Some("2025-03-01T09:00:00.000000000Z"), now),
            "2025-03-01T10:00:00.000000000Z"
        );
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let now = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let first = next_timestamp(None, now);
        let second = next_timestamp(Some(&first), now);
        assert!(second > first);
        assert_eq!(second, "2025-03-01T10:00:00.000000001Z");

        // A previous stamp from the future still wins.
        let ahead = next_timestamp(Some("2030-01-01T00:00:00Z"), now);
        assert_eq!(ahead, "2030-01-01T00:00:00.000000001Z");

        // Garbage is ignored.
        assert_eq!(next_timestamp(Some("yesterday"), now), first);
    }

    #[test]
    fn test_stamp_sets_maintainer_and_timestamp() {
        let mut annotations = BTreeMap::new();
        stamp(&mut annotations, "ts");
        assert_eq!(annotations[ANNOTATION_MAINTAINER], SERVICE_NAME);
        assert_eq!(annotations[ANNOTATION_TIMESTAMP], "ts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_runs_concurrently() {
        let log = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        converge(
            vec![FakeTarget::ok("a", &log), FakeTarget::ok("b", &log)],
            vec![FakeTarget::ok("c", &log)],
        )
        .await
        .unwrap();

        assert_eq!(log.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_aggregates_failures_without_cancelling_others() {
        let log = Arc::new(AtomicUsize::new(0));
        let failing_deploy: Box<dyn Deployable> = Box::new(FakeTarget {
            name: "bad",
            fail_deploy: true,
            fail_destroy: false,
            delay: Duration::from_millis(10),
            log: Arc::clone(&log),
        });
        let failing_destroy: Box<dyn Deployable> = Box::new(FakeTarget {
            name: "sticky",
            fail_deploy: false,
            fail_destroy: true,
            delay: Duration::from_millis(10),
            log: Arc::clone(&log),
        });

        let err = converge(
            vec![failing_deploy, FakeTarget::ok("good", &log)],
            vec![failing_destroy],
        )
        .await
        .unwrap_err();

        assert_eq!(log.load(Ordering::SeqCst), 1, "the good deployment completed");
        match err.downcast_ref::<ActuatorError>() {
            Some(ActuatorError::Aggregate(messages)) => {
                assert_eq!(messages.len(), 2);
                assert!(messages.iter().any(|m| m.contains("bad refused")));
                assert!(messages.iter().any(|m| m.contains("sticky stuck")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_converge_with_nothing_to_do() {
        converge(Vec::new(), Vec::new()).await.unwrap();
    }
}
