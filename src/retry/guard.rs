//! Lock and deadline helpers for provider calls

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::provider::TimedOut;

/// Run `operation` while holding `lock`
///
/// The lock is released however the operation ends, including when the
/// returned future is dropped mid-flight.
pub async fn run_with_lock<S, F, Fut, T>(lock: &Mutex<S>, operation: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = lock.lock().await;
    operation().await
}

/// Bound `operation` to `timeout`
///
/// # Errors
///
/// Returns the operation's own error, or `E::from(TimedOut)` once the
/// deadline passes. The timed-out call is dropped, not signalled.
pub async fn run_with_timeout<Fut, T, E>(operation: Fut, timeout: Duration) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "operation timed out"
            );
            Err(E::from(TimedOut { after: timeout }))
        }
    }
}
