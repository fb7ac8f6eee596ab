//! Exponential-backoff retry executor for the outbound chat request.
//!
//! Attempt 0 runs immediately; each subsequent attempt waits a delay that
//! starts at the policy's base and doubles per failure. The "retrying"
//! state is published over a `watch` channel so a UI indicator can follow
//! it; the signal carries no control effect.
//!
//! Errors whose [`is_retryable`](crate::error::SessionError::is_retryable)
//! is false short-circuit the loop without consuming a retry. That is how
//! a voice-resolution failure or an in-stream error frame bypasses the
//! backoff schedule entirely.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::Result;

/// Retry budget and delay schedule for one send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Number of retries after the initial attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Delay before the first retry; doubles after every failed attempt.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    /// The session controller's policy: worst case attempt at 0 ms,
    /// retries at 800 ms and 2400 ms.
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(800),
        }
    }
}

/// Create a retrying-signal channel, initially false.
pub fn retry_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Run `operation` under the given policy.
///
/// The closure receives the attempt index (0-based). `retrying` is set to
/// true before each wait and to false on every terminal outcome, success
/// or failure.
pub async fn run_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    retrying: &watch::Sender<bool>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                let _ = retrying.send(false);
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off before retry"
                );
                let _ = retrying.send(true);
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => {
                let _ = retrying.send(false);
                return Err(e);
            }
        }
    }
}
