//! Retry logic for transient gateway failures.
//!
//! [`with_retry`] wraps an async operation and re-runs it while it fails
//! with a transient [`CertError`] (connection failures, 5xx responses,
//! timeouts). Deterministic failures (not found, reverted transactions,
//! validation) return immediately.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the capped delay is added
//!
//! Only idempotent operations belong here. Ledger transactions are never
//! wrapped: a retried send can issue a second certificate.

use std::{future::Future, time::Duration};

use certledger_core::{CertError, CertResult, Dependency};
use fail::fail_point;
use rand::Rng;

use crate::config::RetryConfig;

/// Executes `operation`, retrying transient errors per `config`.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> CertResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CertResult<T>>,
{
    let mut last_error: Option<CertError> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay = ?delay,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => {
                if attempt > 0 && err.is_transient() {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted",
                    );
                }
                return Err(err);
            },
        }
    }

    Err(last_error
        .unwrap_or_else(|| CertError::internal("retry loop completed without result or error")))
}

/// Maps a `reqwest` failure to an external dependency error. Timeouts,
/// connect errors, 5xx and 429 responses are transient.
pub(crate) fn http_error(dependency: Dependency, err: reqwest::Error) -> CertError {
    let transient = err.is_timeout()
        || err.is_connect()
        || err.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429);
    CertError::external_with_source(dependency, "http request failed", transient, err)
}

/// Computes the backoff for `attempt` (zero-based):
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..=50%)`.
#[must_use]
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX) / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}
