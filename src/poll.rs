// Wait-for-condition helper.
use crate::adb::{AdbError, AdbResult, TimeoutKind};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Re-evaluate `condition` every `period` until it holds or `timeout` has
/// elapsed. Errors from the condition abort the wait.
pub async fn wait_for<F, Fut>(
    description: &str,
    period: Duration,
    timeout: Duration,
    mut condition: F,
) -> AdbResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdbResult<bool>>,
{
    let deadline = Instant::now() + timeout;
    let timed_out = || AdbError::Timeout {
        kind: TimeoutKind::Condition,
        duration: timeout,
        description: description.to_string(),
    };
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, condition()).await {
            Err(_) => return Err(timed_out()),
            Ok(Ok(true)) => return Ok(()),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => return Err(e),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        log::debug!("Still waiting for {}", description);
        tokio::time::sleep(period.min(remaining)).await;
    }
}
