//! Retry executor integration tests

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use savebot::{
    ChatId, ChatLimitConfig, ConnectionConfig, ConnectionManager, Message, ProviderError,
    ResourceKey, RetryExecutor, RetryPolicy, backoff_delay, run_with_timeout,
};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use common::{ScriptedCall, manual_clock, sample_message};

fn executor(clock: &Arc<savebot::ManualClock>) -> RetryExecutor {
    RetryExecutor::with_clock(ChatLimitConfig::default(), clock.clone())
}

// -- backoff --------------------------------------------------------------

#[test]
fn unjittered_backoff_schedule() {
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(60);

    assert_eq!(backoff_delay(1, base, max), Duration::from_secs(1));
    assert_eq!(backoff_delay(4, base, max), Duration::from_secs(8));
    assert_eq!(backoff_delay(7, base, max), Duration::from_secs(60));
}

// -- classification-driven retry -----------------------------------------

#[tokio::test]
async fn flood_waits_do_not_consume_budget() {
    let clock = manual_clock();
    let op = ScriptedCall::new(vec![Err(ProviderError::FloodWait { seconds: 5 }); 3], 11u32);

    let out = executor(&clock)
        .retry_with_backoff(&RetryPolicy::throwing().max_retries(0), &(), || op.call())
        .await;

    assert_eq!(assert_ok!(out), 11);
    assert_eq!(op.calls(), 4);
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 3);
    assert!(sleeps.iter().all(|s| *s >= Duration::from_secs(6)));
}

#[tokio::test]
async fn client_fatal_is_attempted_once() {
    let clock = manual_clock();
    let op = ScriptedCall::new(
        vec![Err(ProviderError::from_rpc(403, "CHAT_WRITE_FORBIDDEN"))],
        0u32,
    );

    let out = executor(&clock)
        .safe_execute(&RetryPolicy::safe(), &ChatId(-100_9), || op.call())
        .await;

    assert_eq!(out, None);
    assert_eq!(op.calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn network_errors_then_success() {
    let clock = manual_clock();
    let reset = || Err(ProviderError::Network("connection reset by peer".into()));
    let op = ScriptedCall::new(vec![reset(), reset()], "saved".to_string());

    let out = executor(&clock)
        .retry_with_backoff(&RetryPolicy::throwing(), &(), || op.call())
        .await;

    assert_eq!(assert_ok!(out), "saved");
    assert_eq!(op.calls(), 3);

    // ±25% around 1s then 2s
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 2);
    assert!(sleeps[0] >= Duration::from_millis(750) && sleeps[0] <= Duration::from_millis(1250));
    assert!(sleeps[1] >= Duration::from_millis(1500) && sleeps[1] <= Duration::from_millis(2500));
}

#[tokio::test]
async fn exhaustion_surfaces_last_error() {
    let clock = manual_clock();
    let op = ScriptedCall::new(vec![Err(ProviderError::from_rpc(500, "RPC_CALL_FAIL")); 10], 0u32);

    let out = executor(&clock)
        .retry_with_backoff(&RetryPolicy::throwing(), &(), || op.call())
        .await;

    assert_eq!(
        assert_err!(out),
        ProviderError::Rpc {
            code: 500,
            name: "RPC_CALL_FAIL".into()
        }
    );
    assert_eq!(op.calls(), 6);
}

#[tokio::test]
async fn transfer_refuses_flood_wait_over_threshold() {
    let clock = manual_clock();
    let op = ScriptedCall::new(vec![Err(ProviderError::from_rpc(420, "FLOOD_WAIT_600"))], 0u32);
    let policy = RetryPolicy::transfer().max_throttle_wait(Duration::from_secs(180));

    let out = executor(&clock)
        .retry_with_backoff(&policy, &(), || op.call())
        .await;

    assert_eq!(assert_err!(out), ProviderError::FloodWait { seconds: 600 });
    assert_eq!(op.calls(), 1);
}

#[tokio::test]
async fn bot_api_flood_wait_is_honoured() {
    let clock = manual_clock();
    let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
    let op = ScriptedCall::new(vec![Err(ProviderError::from_bot_api(429, body))], true);

    let out = executor(&clock)
        .safe_execute(&RetryPolicy::safe(), &(), || op.call())
        .await;

    assert_eq!(out, Some(true));
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(4)]);
}

#[tokio::test]
async fn flood_wait_between_network_errors_keeps_budget() {
    let clock = manual_clock();
    let reset = || Err(ProviderError::Network("connection reset by peer".into()));
    let op = ScriptedCall::new(
        vec![reset(), Err(ProviderError::FloodWait { seconds: 5 }), reset()],
        0u32,
    );
    let policy = RetryPolicy::throwing().max_retries(1).jitter(0.0);

    let out = executor(&clock)
        .retry_with_backoff(&policy, &(), || op.call())
        .await;

    assert_eq!(
        assert_err!(out),
        ProviderError::Network("connection reset by peer".into())
    );
    assert_eq!(op.calls(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(6)]
    );
}

#[tokio::test]
async fn unclassified_error_is_swallowed_after_one_attempt() {
    let clock = manual_clock();
    let op = ScriptedCall::new(
        vec![Err(ProviderError::Other("session file corrupted".into()))],
        0u32,
    );

    let out = executor(&clock)
        .safe_execute(&RetryPolicy::safe(), &ChatId(-100_3), || op.call())
        .await;

    assert_eq!(out, None);
    assert_eq!(op.calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn huge_flood_wait_saturates_instead_of_overflowing() {
    let clock = manual_clock();
    let op = ScriptedCall::new(
        vec![Err(ProviderError::from_rpc(420, "FLOOD_WAIT_18446744073709551615"))],
        1u32,
    );

    let out = executor(&clock)
        .safe_execute(&RetryPolicy::safe(), &(), || op.call())
        .await;

    assert_eq!(out, Some(1));
    assert_eq!(op.calls(), 2);
    assert_eq!(clock.sleeps(), vec![Duration::MAX]);
}

// -- timeouts -------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timed_out_attempt_is_retried() {
    let executor = RetryExecutor::new(ChatLimitConfig::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::safe().jitter(0.0);
    let start = Instant::now();

    let out: Result<u32, ProviderError> = executor
        .retry_with_backoff(&policy, &(), || {
            let attempts = attempts.clone();
            run_with_timeout(
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    Ok(n)
                },
                Duration::from_secs(2),
            )
        })
        .await;

    assert_eq!(assert_ok!(out), 2);
    // 2s deadline plus 1s backoff
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100), "{elapsed:?}");
}

// -- decorator and composition --------------------------------------------

#[tokio::test]
async fn decorated_fetch_uses_message_chat() {
    let clock = manual_clock();
    let executor = RetryExecutor::with_clock(
        ChatLimitConfig {
            max_requests: 1,
            ..ChatLimitConfig::default()
        },
        clock.clone(),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let forward = executor.with_backoff(RetryPolicy::throwing(), {
        let calls = calls.clone();
        move |msg: Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, ProviderError>(msg.id) }
        }
    });

    let msg = sample_message(-100_42, 5);
    assert_ok!(forward.call(msg.clone()).await);
    assert!(clock.sleeps().is_empty());

    // second call in the same chat pays the soft-limit penalty
    assert_ok!(forward.call(msg).await);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_inside_connection_lock() {
    let clock = manual_clock();
    let manager: ConnectionManager = ConnectionManager::with_clock(
        ConnectionConfig {
            lock_spacing: Duration::ZERO,
            ..ConnectionConfig::default()
        },
        clock.clone(),
    );
    let executor = RetryExecutor::with_clock(ChatLimitConfig::default(), clock.clone());
    let chat = ChatId(-100_77);
    let op = ScriptedCall::new(vec![Err(ProviderError::Network("dns error".into()))], 3u8);
    let policy = RetryPolicy::safe().jitter(0.0);

    let out = manager
        .with_connection_lock(&ResourceKey::chat(chat), || {
            executor.safe_execute(&policy, &chat, || op.call())
        })
        .await;

    assert_eq!(out, Some(3));
    assert_eq!(op.calls(), 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
}
