use std::future::Future;
use std::time::Duration;

use papersmith_core::config::BackendSettings;
use papersmith_core::error::BackendError;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Exponential backoff for transient provider faults.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(500), max_backoff: MAX_BACKOFF }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `op`, retrying only errors for which [`BackendError::is_retryable`] holds.
    pub async fn run<T, F, Fut>(&self, backend: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(backend, attempt, ?delay, error = %err, "backend fault, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(4) }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn transient_faults_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out = fast()
            .run("gemini", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackendError::transient("gemini", "HTTP 503"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: Result<(), _> = fast()
            .run("openai", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::transient("openai", "HTTP 429"))
            })
            .await;
        assert!(out.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_surfaced() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: Result<(), _> = fast()
            .run("gemini", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::timeout("gemini", Duration::from_secs(1)))
            })
            .await;
        assert!(matches!(out, Err(BackendError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_faults_surface_immediately() {
        for err in [
            BackendError::unavailable("openai", "HTTP 401"),
            BackendError::invalid_response("openai", "no text"),
        ] {
            let calls = AtomicU32::new(0);
            let out: Result<(), _> = fast()
                .run("openai", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let err = err.clone();
                    async move { Err(err) }
                })
                .await;
            assert!(out.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
