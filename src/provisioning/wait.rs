//! Bounded status polling and transient-failure retries
//!
//! Every "wait for the provider" in setup goes through [`poll_until`], which
//! re-reads a resource's status until it settles, fails, or the deadline
//! passes. Calls that can fail while a dependency propagates go through
//! [`RetryPolicy::run`].

use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::error::{ProvisionError, ProvisionResult};
use crate::config::WaitSettings;
use crate::domain::error::{CloudError, CloudResult};

/// Result of one status read
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Still transitioning; carries the observed status
    Pending(String),
    Ready(T),
    /// Terminal failure; carries the observed status
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn resources(settings: &WaitSettings) -> Self {
        Self::new(settings.poll_interval(), settings.resource_timeout())
    }

    pub fn preparation(settings: &WaitSettings) -> Self {
        Self::new(settings.poll_interval(), settings.prepare_timeout())
    }
}

/// Poll `probe` until it reports ready or failed, or the timeout elapses
pub async fn poll_until<T, F, Fut>(what: &str, policy: WaitPolicy, mut probe: F) -> ProvisionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProvisionResult<Probe<T>>>,
{
    let started = Instant::now();
    loop {
        match probe().await? {
            Probe::Ready(value) => return Ok(value),
            Probe::Failed(status) => {
                return Err(ProvisionError::ResourceFailed {
                    what: what.to_string(),
                    status,
                })
            }
            Probe::Pending(status) => {
                let waited = started.elapsed();
                if waited >= policy.timeout {
                    return Err(ProvisionError::Timeout {
                        what: what.to_string(),
                        waited,
                    });
                }
                debug!(what, status = %status, "waiting");
                sleep(policy.interval).await;
            }
        }
    }
}

/// Exponential backoff applied to calls that fail transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &WaitSettings) -> Self {
        Self {
            initial_interval: settings.poll_interval().min(Duration::from_secs(1)),
            max_interval: settings.poll_interval().max(Duration::from_millis(1)) * 5,
            max_elapsed: settings.retry_max_elapsed(),
        }
    }

    /// Retry `call` while it returns `CloudError::Transient`
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        backoff::future::retry(backoff, || {
            let attempt = call();
            async move {
                attempt.await.map_err(|e: CloudError| {
                    if e.is_transient() {
                        debug!(operation, error = %e, "retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let counter = AtomicU32::new(0);
        let reads = &counter;
        let value = poll_until("thing", fast(), move || async move {
            if reads.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(Probe::Pending("CREATING".to_string()))
            } else {
                Ok(Probe::Ready(7))
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_failed_status() {
        let err = poll_until::<(), _, _>("agent A", fast(), || async {
            Ok(Probe::Failed("FAILED".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::ResourceFailed { ref status, .. } if status == "FAILED"));
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let policy = WaitPolicy::new(Duration::from_millis(5), Duration::from_millis(20));
        let err = poll_until::<(), _, _>("alias", policy, || async {
            Ok(Probe::Pending("CREATING".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = policy
            .run("op", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloudError::transient("op", "throttled"))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: CloudResult<()> = policy
            .run("op", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::fatal("op", "denied"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
