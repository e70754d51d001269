//! Classification-driven retry for calls into the messaging client
//!
//! [`RetryExecutor`] wraps an async call and, depending on the
//! [`ErrorKind`] of each failure, sits out a flood wait, backs off and tries
//! again, treats "not modified" as success, or gives up. Two call shapes
//! share the same loop:
//!
//! - [`RetryExecutor::retry_with_backoff`] hands the last error back when it
//!   gives up;
//! - [`RetryExecutor::safe_execute`] logs it and returns `None`, for batch
//!   steps that must not stop the batch.

pub mod backoff;
pub mod chat_limiter;
pub mod guard;
pub mod policy;

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::clock::{SharedClock, TokioClock};
use crate::provider::{ChatId, ChatScoped, Classify, ErrorKind};

pub use backoff::{backoff_delay, exponential_backoff};
pub use chat_limiter::{ChatLimitConfig, ChatRateLimiter};
pub use guard::{run_with_lock, run_with_timeout};
pub use policy::RetryPolicy;

/// Book-keeping for one wrapped call
#[derive(Debug, Default)]
struct RetryState {
    chat_id: Option<ChatId>,
    attempts: u32,
    retries: u32,
    throttle_waits: u32,
    last_error: Option<ErrorKind>,
}

/// Retry loop shared by both call shapes
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    clock: SharedClock,
    chat_limiter: ChatRateLimiter,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(ChatLimitConfig::default())
    }
}

impl RetryExecutor {
    /// Create an executor driven by the tokio timer
    #[must_use]
    pub fn new(chat_limit: ChatLimitConfig) -> Self {
        Self::with_clock(chat_limit, Arc::new(TokioClock))
    }

    /// Create an executor with an explicit clock
    #[must_use]
    pub fn with_clock(chat_limit: ChatLimitConfig, clock: SharedClock) -> Self {
        Self {
            clock,
            chat_limiter: ChatRateLimiter::new(chat_limit),
        }
    }

    /// Call `operation` until it succeeds or fails for good
    ///
    /// `scope` is consulted once for a chat id to feed the per-chat soft
    /// limiter. Flood waits are slept out without consuming the retry
    /// budget; network, RPC and timeout failures consume it and back off.
    ///
    /// # Errors
    ///
    /// Returns the last error once the budget is exhausted, or the first
    /// client, unclassified or over-long throttle error
    pub async fn retry_with_backoff<S, F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        scope: &S,
        operation: F,
    ) -> Result<T, E>
    where
        S: ChatScoped + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.run(type_name::<F>(), policy, scope.chat_id(), operation)
            .await
    }

    /// Like [`retry_with_backoff`](Self::retry_with_backoff), but failures
    /// are logged and reported as `None`
    pub async fn safe_execute<S, F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        scope: &S,
        operation: F,
    ) -> Option<T>
    where
        S: ChatScoped + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let name = type_name::<F>();
        match self.run(name, policy, scope.chat_id(), operation).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(operation = name, error = %e, "safe_execute returning None");
                None
            }
        }
    }

    /// Wrap `operation` so every call goes through
    /// [`retry_with_backoff`](Self::retry_with_backoff) with `policy`
    #[must_use]
    pub fn with_backoff<F>(&self, policy: RetryPolicy, operation: F) -> Retrying<F> {
        Retrying {
            executor: self.clone(),
            policy,
            operation,
        }
    }

    /// Forget per-chat counters whose window has elapsed
    pub fn sweep(&self) -> usize {
        self.chat_limiter.cleanup(self.clock.now())
    }

    async fn run<F, Fut, T, E>(
        &self,
        name: &'static str,
        policy: &RetryPolicy,
        chat_id: Option<ChatId>,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut state = RetryState {
            chat_id,
            ..RetryState::default()
        };

        if let Some(chat) = state.chat_id
            && self.chat_limiter.should_throttle(chat, self.clock.now())
        {
            self.clock.sleep(self.chat_limiter.config().penalty).await;
        }

        loop {
            state.attempts += 1;

            let error = match operation().await {
                Ok(value) => {
                    if state.attempts > 1 {
                        tracing::debug!(
                            operation = name,
                            attempts = state.attempts,
                            retries = state.retries,
                            throttle_waits = state.throttle_waits,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let kind = error.kind();
            match kind {
                ErrorKind::ServerThrottle(wait) => {
                    if policy.refuses_throttle(wait) {
                        tracing::error!(
                            operation = name,
                            wait_secs = wait.as_secs(),
                            "flood wait longer than allowed, giving up"
                        );
                        return Err(error);
                    }

                    let pause = wait.saturating_add(policy.throttle_buffer);
                    tracing::warn!(
                        operation = name,
                        chat_id = ?state.chat_id,
                        wait_secs = pause.as_secs(),
                        "flood wait, sleeping"
                    );
                    state.throttle_waits += 1;
                    self.clock.sleep(pause).await;
                }
                ErrorKind::TransientNetwork | ErrorKind::TransientProtocol | ErrorKind::Timeout => {
                    state.retries += 1;
                    if state.retries > policy.max_retries {
                        tracing::error!(
                            operation = name,
                            max_retries = policy.max_retries,
                            attempts = state.attempts,
                            previous = state.last_error.map(ErrorKind::label),
                            error = %error,
                            "maximum retries exceeded"
                        );
                        return Err(error);
                    }

                    let delay = policy.delay_for_attempt(state.retries);
                    tracing::info!(
                        operation = name,
                        kind = kind.label(),
                        error = %error,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = state.retries,
                        max_retries = policy.max_retries,
                        "retrying after transient error"
                    );
                    state.last_error = Some(kind);
                    self.clock.sleep(delay).await;
                }
                ErrorKind::NoOp => {
                    // Content already matches; the provider guarantees a repeat is harmless
                    tracing::info!(operation = name, "not modified, content unchanged");
                    return operation().await;
                }
                ErrorKind::ClientFatal => {
                    tracing::error!(operation = name, error = %error, "client error, not retrying");
                    return Err(error);
                }
                ErrorKind::Unclassified => {
                    tracing::error!(operation = name, error = %error, "unexpected error");
                    return Err(error);
                }
            }
        }
    }
}

/// A callable whose every invocation is retried with a fixed policy
///
/// Built by [`RetryExecutor::with_backoff`]. The arguments are cloned for
/// each attempt, and their first element decides the chat for the soft
/// limiter.
#[derive(Debug, Clone)]
pub struct Retrying<F> {
    executor: RetryExecutor,
    policy: RetryPolicy,
    operation: F,
}

impl<F> Retrying<F> {
    /// Policy applied to each call
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke the wrapped operation with `args`
    ///
    /// # Errors
    ///
    /// Same as [`RetryExecutor::retry_with_backoff`]
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        A: ChatScoped + Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.executor
            .run(type_name::<F>(), &self.policy, args.chat_id(), || {
                (self.operation)(args.clone())
            })
            .await
    }
}
