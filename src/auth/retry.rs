//! Bounded retry with linear backoff for provider calls.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use super::error::AuthError;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(600);

/// Errors that tell transient failures apart from final ones.
pub trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AuthError {
    fn is_retryable(&self) -> bool {
        AuthError::is_retryable(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that never waits; used when the caller drives timing itself.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. The last error is returned unchanged.
    ///
    /// # Errors
    /// Returns the final error of `operation`.
    pub async fn run<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(name, 0, operation).await
    }

    /// Like [`run`](Self::run), but any failure, rejections included, earns
    /// one verbatim repeat before the error is returned.
    ///
    /// # Errors
    /// Returns the final error of `operation`.
    pub async fn run_repeating<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(name, 1, operation).await
    }

    async fn run_with<T, E, F, Fut>(
        &self,
        name: &str,
        unconditional: u32,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if retry < unconditional
                        || (err.is_retryable() && retry < self.max_retries) =>
                {
                    retry += 1;
                    let backoff = self.backoff(retry);
                    warn!(
                        operation = name,
                        retry,
                        backoff = ?backoff,
                        "Provider call failed: {err}"
                    );
                    sleep(backoff).await;
                }
                Err(err) => {
                    if retry > 0 {
                        error!(operation = name, retries = retry, "Giving up: {err}");
                    }
                    return Err(err);
                }
            }
        }
    }
}
