// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry, backoff and bounded polling.
//!
//! Two kinds of waiting happen in this service:
//!
//! - **API retries**: [`retry_api_call`] retries transient Kubernetes API errors
//!   (429, 5xx, connection failures) with exponential backoff and fails fast on
//!   everything else.
//! - **Bounded polling**: waits for an external actor (DNS controller, resource
//!   manager) to converge. These use a [`Ticker`], which is either bounded by a
//!   deadline or by a number of attempts, and turn "still pending at the end" into
//!   an explicit [`ActuatorError::Timeout`]. [`poll_until`] wraps the common case.
//!
//! All sleeping goes through `tokio::time`, so dropping the future cancels a wait
//! and tests can run the same code with paused virtual time.

use crate::errors::ActuatorError;
use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Shape of an exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// First interval
    pub initial: Duration,
    /// Upper bound of a single interval
    pub cap: Duration,
    /// Upper bound of the total time spent backing off
    pub budget: Option<Duration>,
    /// Growth factor per step
    pub factor: f64,
    /// Relative jitter applied to each interval
    pub jitter: f64,
}

/// Kubernetes API retries: 100ms doubling up to 30s per step, ±10% jitter,
/// giving up after 5 minutes.
pub const API_BACKOFF: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(100),
    cap: Duration::from_secs(30),
    budget: Some(Duration::from_secs(300)),
    factor: 2.0,
    jitter: 0.1,
};

/// Running state of a [`BackoffPolicy`].
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    started: Instant,
}

impl Backoff {
    /// Start backing off now.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            next: policy.initial,
            started: Instant::now(),
        }
    }

    /// Policy this backoff follows.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Un-jittered interval the next step will be based on.
    #[must_use]
    pub fn upcoming(&self) -> Duration {
        self.next
    }

    /// Next interval to wait, or `None` once the budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self
            .policy
            .budget
            .is_some_and(|budget| self.started.elapsed() >= budget)
        {
            return None;
        }

        let base = self.next;
        self.next = base.mul_f64(self.policy.factor).min(self.policy.cap);

        if self.policy.jitter <= 0.0 {
            return Some(base);
        }
        let spread = base.as_secs_f64() * self.policy.jitter;
        let secs = rand::rng().random_range(-spread..=spread) + base.as_secs_f64();
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Random delay in `[min, max]`, used to spread out retries of a busy lock.
#[must_use]
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Transient errors (HTTP 429, 5xx, connection failures) are retried until the
/// backoff budget is spent; any other error is returned immediately.
///
/// # Errors
///
/// Returns the first non-retryable error, or an error once the backoff gives up.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use shoot_dns_service::crd::Extension;
/// use shoot_dns_service::reconcilers::retry::retry_api_call;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<Extension> = Api::namespaced(client, "shoot--dev--a");
///
/// let extension = retry_api_call(
///     || api.get_opt("shoot-dns-service"),
///     "get extension shoot-dns-service",
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = Backoff::new(API_BACKOFF);
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable Kubernetes API error"
                    );
                    return Err(e.into());
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(anyhow::anyhow!(
                        "{operation_name}: backoff exhausted after {attempt} attempts: {e}"
                    ));
                }
            }
        }
    }
}

/// Whether a Kubernetes error is transient.
///
/// Rate limiting (429), server errors (5xx) and transport failures are
/// transient. Client errors are permanent.
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => api_err.code == 429 || (500..600).contains(&api_err.code),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Fixed-interval ticker bounded by a deadline or by a number of ticks.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    deadline: Option<Instant>,
    max_ticks: Option<u32>,
    ticks: u32,
    started: Instant,
}

impl Ticker {
    /// Tick every `interval` until `timeout` has passed.
    #[must_use]
    pub fn with_timeout(interval: Duration, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            interval,
            deadline: Some(started + timeout),
            max_ticks: None,
            ticks: 0,
            started,
        }
    }

    /// Tick every `interval`, at most `attempts` times.
    #[must_use]
    pub fn with_attempts(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            deadline: None,
            max_ticks: Some(attempts),
            ticks: 0,
            started: Instant::now(),
        }
    }

    /// Sleep until the next tick. Returns `false` without sleeping once the
    /// budget is exhausted.
    pub async fn tick(&mut self) -> bool {
        if self.max_ticks.is_some_and(|max| self.ticks >= max) {
            return false;
        }
        let mut wait = self.interval;
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            wait = wait.min(deadline - now);
        }
        tokio::time::sleep(wait).await;
        self.ticks += 1;
        true
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Time since the ticker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Call `check` until it yields a value, ticking in between.
///
/// `check` runs once immediately and once after every tick. Errors from `check`
/// end the wait.
///
/// # Errors
///
/// Returns the first error of `check`, or [`ActuatorError::Timeout`] naming
/// `what` when the ticker runs out.
pub async fn poll_until<T, F, Fut>(mut ticker: Ticker, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        if !ticker.tick().await {
            return Err(ActuatorError::Timeout {
                what: what.to_string(),
                waited: ticker.elapsed(),
            }
            .into());
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
