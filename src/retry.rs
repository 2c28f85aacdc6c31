//! Backoff helpers for node reads and confirmation polling.
//!
//! [`retry_with_classifier`] re-runs idempotent reads while the classifier calls the failure
//! transient. [`poll_until`] drives the receipt and user operation loops: it asks again until
//! a value shows up and stops early when its cancellation token fires.
//!
//! ```ignore
//! use crate::retry::{retry_with_classifier, RetryConfig};
//!
//! let code = retry_with_classifier(RetryConfig::for_reads(), "eth_call", || async {
//!     Ok::<_, Error>(provider.call(request.clone()).await?)
//! }, Error::is_transient).await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::consts::{
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_READ_RETRY_DELAY_SECS, RECEIPT_POLL_BACKOFF,
    RECEIPT_POLL_INITIAL_MS, RECEIPT_POLL_MAX_MS,
};
use crate::error::{self, Error};

/// How often, and how far apart, an operation is attempted.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 0 keeps going until the operation succeeds or is cancelled.
    pub max_attempts: u32,
    pub delay: Duration,
    /// 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Same `delay_secs` between every attempt.
    pub fn fixed(delay_secs: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_secs(delay_secs),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(delay_secs),
        }
    }

    /// Short fixed delay for contract reads.
    pub fn for_reads() -> Self {
        Self::fixed(DEFAULT_READ_RETRY_DELAY_SECS, DEFAULT_MAX_RETRY_ATTEMPTS)
    }

    /// Unbounded backoff used while waiting for a transaction to be mined.
    pub fn for_receipts() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::from_millis(RECEIPT_POLL_INITIAL_MS),
            backoff_multiplier: RECEIPT_POLL_BACKOFF,
            max_delay: Duration::from_millis(RECEIPT_POLL_MAX_MS),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.backoff_multiplier <= 1.0 {
            return self.delay;
        }

        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let grown = Duration::from_millis((self.delay.as_millis() as f64 * factor) as u64);
        grown.min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable` rejects, or runs out
/// of attempts. The last error is returned.
pub async fn retry_with_classifier<F, Fut, T, E, C>(
    config: RetryConfig,
    operation_name: &str,
    operation: F,
    is_retryable: C,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 1u32;

    loop {
        let e = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !is_retryable(&e) {
            debug!(operation = operation_name, error = %e, "Permanent failure, not retrying");
            return Err(e);
        }
        if config.exhausted(attempt) {
            warn!(
                operation = operation_name,
                attempt,
                error = %e,
                "Giving up after repeated transient failures"
            );
            return Err(e);
        }

        let delay = config.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Ask `check` until it yields a value.
///
/// `Ok(None)` means "not yet" and schedules another attempt after the configured backoff.
/// Transient errors are logged and treated the same way; any other error is returned.
/// When `cancel` fires the loop stops with [`Error::Cancelled`]. Cancelling only stops
/// local polling.
pub async fn poll_until<F, Fut, T>(
    config: RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    check: F,
) -> error::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = error::Result<Option<T>>>,
{
    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match check().await {
            Ok(Some(value)) => {
                debug!(operation = operation_name, attempt, "Poll completed");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    "Transient error while polling"
                );
            }
            Err(e) => return Err(e),
        }

        if config.exhausted(attempt) {
            return Err(Error::Network(format!(
                "{operation_name} did not complete after {attempt} attempts"
            )));
        }

        let delay = config.delay_for_attempt(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
