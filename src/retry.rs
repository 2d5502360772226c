// Timeout + retry combinator shared by every device operation.
use crate::adb::{AdbError, AdbResult, TimeoutKind, Transport};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Decides whether a failed attempt is worth repeating.
pub type RetryPredicate = fn(&AdbError) -> bool;

/// Retries transport-level failures only, never a nonzero exit.
pub fn transport_errors_only(err: &AdbError) -> bool {
    err.is_retryable()
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Budget for all attempts together.
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub should_retry: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_millis(500),
            should_retry: transport_errors_only,
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries,
            ..Self::default()
        }
    }

    pub fn with_predicate(mut self, should_retry: RetryPredicate) -> Self {
        self.should_retry = should_retry;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Hook run between a failed attempt and the next one.
#[allow(async_fn_in_trait)]
pub trait Recovery {
    /// Returns `true` when the failure was repaired and the attempt should be
    /// repeated regardless of the retry predicate.
    async fn recover(&self, err: &AdbError) -> AdbResult<bool>;
}

pub struct NoRecovery;

impl Recovery for NoRecovery {
    async fn recover(&self, _err: &AdbError) -> AdbResult<bool> {
        Ok(false)
    }
}

/// Rebuilds the transport session when the ADB server lost protocol sync.
pub struct ReconnectOnDesync<'a, T: Transport>(pub &'a T);

impl<T: Transport> Recovery for ReconnectOnDesync<'_, T> {
    async fn recover(&self, err: &AdbError) -> AdbResult<bool> {
        if !err.is_protocol_desync() {
            return Ok(false);
        }
        log::warn!("Protocol desync on {}: reconnecting", self.0.serial());
        self.0.reconnect().await?;
        Ok(true)
    }
}

/// Run `op` under `policy` without any recovery step.
pub async fn wrap<F, Fut, T>(policy: &RetryPolicy, description: &str, op: F) -> AdbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdbResult<T>>,
{
    wrap_with(policy, &NoRecovery, description, op).await
}

/// Run `op` until it succeeds, the policy refuses another attempt, or the
/// cumulative deadline passes. Each attempt only gets what is left of the
/// deadline.
pub async fn wrap_with<R, F, Fut, T>(
    policy: &RetryPolicy,
    recovery: &R,
    description: &str,
    mut op: F,
) -> AdbResult<T>
where
    R: Recovery,
    F: FnMut() -> Fut,
    Fut: Future<Output = AdbResult<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let timed_out = || AdbError::Timeout {
        kind: TimeoutKind::Io,
        duration: policy.timeout,
        description: description.to_string(),
    };
    let total_attempts = policy.retries.saturating_add(1);

    for attempt in 1..=total_attempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        let err = match tokio::time::timeout(remaining, op()).await {
            Err(_) => return Err(timed_out()),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
        };
        if attempt == total_attempts {
            return Err(err);
        }
        let recovered = recovery.recover(&err).await?;
        if !recovered && !(policy.should_retry)(&err) {
            return Err(err);
        }
        log::warn!(
            "{} failed (attempt {}/{}), retrying: {}",
            description,
            attempt,
            total_attempts,
            err
        );
        let pause = policy
            .retry_delay
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::time::sleep(pause).await;
    }
    Err(timed_out())
}
