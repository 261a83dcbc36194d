use crate::error::Error;
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// A bounded retry schedule shared by every upstream and warehouse call
/// site. Fetches use an exponential schedule, inserts a fixed one; tests
/// use zero delays.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor: backoff_factor.max(1),
        }
    }

    /// 6 attempts, 5s initial delay, tripling between attempts.
    pub fn upstream_fetch() -> Self {
        RetryPolicy::new(6, Duration::from_secs(5), 3)
    }

    /// 6 attempts with a fixed 5s delay.
    pub fn warehouse_write() -> Self {
        RetryPolicy::new(6, Duration::from_secs(5), 1)
    }

    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy::new(max_attempts, Duration::ZERO, 1)
    }

    /// Runs `op` until it succeeds, fails a `retryable` check, or exhausts
    /// the attempt budget. The last error is returned as-is so callers can
    /// wrap it with window context.
    pub async fn run<T, F, Fut>(
        &self,
        retryable: impl Fn(&Error) -> bool,
        mut op: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut delay = self.initial_delay;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    warn!(
                        "attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.max_attempts, err, delay
                    );
                    sleep(delay).await;
                    delay *= self.backoff_factor;
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::UpstreamStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::immediate(6)
            .run(Error::is_transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::immediate(6)
            .run(Error::is_transient, || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = RetryPolicy::immediate(4)
            .run(Error::is_transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = RetryPolicy::immediate(6)
            .run(Error::is_transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::Configuration {
                        message: "bad token".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            Error::Configuration { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
