//! Retry and concurrency guard around a KMS backend.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::{KekRef, KeyManagementClient, KmsError};

/// Bounded exponential backoff for transient KMS failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// A [`KeyManagementClient`] that retries transient failures and caps the
/// number of concurrent calls to the wrapped backend.
pub struct GuardedKms {
    inner: Arc<dyn KeyManagementClient>,
    permits: Semaphore,
    policy: RetryPolicy,
}

impl GuardedKms {
    /// Guard `inner` with at most `max_concurrency` in-flight calls.
    pub fn new(
        inner: Arc<dyn KeyManagementClient>,
        max_concurrency: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            permits: Semaphore::new(max_concurrency.max(1)),
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
        }
    }

    async fn call<T, F, Fut>(&self, op: &'static str, kek: &KekRef, f: F) -> Result<T, KmsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, KmsError>>,
    {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| KmsError::Closed)?;
                f().await
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        op,
                        kek = %kek,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient KMS failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(KmsError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                other => {
                    if other.is_ok() && attempt > 1 {
                        debug!(op, kek = %kek, attempt, "KMS call succeeded after retry");
                    }
                    return other;
                }
            }
        }
    }
}

#[async_trait]
impl KeyManagementClient for GuardedKms {
    async fn wrap(&self, kek: &KekRef, plaintext_key: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.call("wrap", kek, || self.inner.wrap(kek, plaintext_key))
            .await
    }

    async fn unwrap(
        &self,
        kek: &KekRef,
        wrapped_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.call("unwrap", kek, || self.inner.unwrap(kek, wrapped_key))
            .await
    }

    async fn close(&self) -> Result<(), KmsError> {
        self.permits.close();
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::kms::MockKeyManagementClient;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(500));
        assert_eq!(p.backoff(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut mock = MockKeyManagementClient::new();
        mock.expect_wrap().times(3).returning(move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(KmsError::Transient("throttled".into()))
            } else {
                Ok(vec![0xAA])
            }
        });

        let kms = GuardedKms::new(Arc::new(mock), 4, fast_policy(5));
        let out = kms.wrap(&KekRef::from("k"), &[1; 32]).await.unwrap();
        assert_eq!(out, vec![0xAA]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut mock = MockKeyManagementClient::new();
        mock.expect_unwrap()
            .times(3)
            .returning(|_, _| Err(KmsError::Transient("timeout".into())));

        let kms = GuardedKms::new(Arc::new(mock), 4, fast_policy(3));
        let err = kms.unwrap(&KekRef::from("k"), &[0; 60]).await.unwrap_err();
        assert!(matches!(err, KmsError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn authorization_failure_is_not_retried() {
        let mut mock = MockKeyManagementClient::new();
        mock.expect_unwrap().times(1).returning(|kek, _| {
            Err(KmsError::KeyUnavailable {
                kek: kek.to_string(),
                reason: "AccessDeniedException".into(),
            })
        });

        let kms = GuardedKms::new(Arc::new(mock), 4, fast_policy(5));
        let err = kms.unwrap(&KekRef::from("k"), &[0; 60]).await.unwrap_err();
        assert!(matches!(err, KmsError::KeyUnavailable { .. }));
    }

    #[tokio::test]
    async fn integrity_failure_is_not_retried() {
        let mut mock = MockKeyManagementClient::new();
        mock.expect_unwrap().times(1).returning(|kek, _| {
            Err(KmsError::UnwrapIntegrity {
                kek: kek.to_string(),
            })
        });

        let kms = GuardedKms::new(Arc::new(mock), 4, fast_policy(5));
        assert!(matches!(
            kms.unwrap(&KekRef::from("k"), &[0; 60]).await,
            Err(KmsError::UnwrapIntegrity { .. })
        ));
    }

    /// Counts how many calls are inside the client at once.
    #[derive(Default)]
    struct CountingKms {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl KeyManagementClient for CountingKms {
        async fn wrap(&self, _kek: &KekRef, plaintext_key: &[u8]) -> Result<Vec<u8>, KmsError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(plaintext_key.to_vec())
        }

        async fn unwrap(
            &self,
            _kek: &KekRef,
            wrapped_key: &[u8],
        ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
            Ok(Zeroizing::new(wrapped_key.to_vec()))
        }

        async fn close(&self) -> Result<(), KmsError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn in_flight_calls_never_exceed_the_cap() {
        let inner = Arc::new(CountingKms::default());
        let kms = GuardedKms::new(inner.clone(), 3, fast_policy(1));
        let kek = KekRef::from("k");

        let keys: Vec<[u8; 1]> = (0..16u8).map(|i| [i]).collect();

        let results = futures::future::join_all(keys.iter().map(|k| kms.wrap(&kek, k))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(inner.peak.load(Ordering::SeqCst), 3);
        assert_eq!(inner.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_rejects_later_calls() {
        let mut mock = MockKeyManagementClient::new();
        mock.expect_close().times(1).returning(|| Ok(()));
        mock.expect_wrap().never();

        let kms = GuardedKms::new(Arc::new(mock), 4, fast_policy(3));
        kms.close().await.unwrap();
        assert!(matches!(
            kms.wrap(&KekRef::from("k"), &[0; 32]).await,
            Err(KmsError::Closed)
        ));
    }
}
