//! Per-chat soft rate limiter in front of retried calls

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::provider::ChatId;

/// Tunables for [`ChatRateLimiter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLimitConfig {
    /// Calls per chat per window before the penalty applies
    pub max_requests: u32,
    /// Counting window
    pub window: Duration,
    /// Flat delay inserted once a chat is over its budget
    pub penalty: Duration,
}

impl Default for ChatLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(60),
            penalty: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ChatCounter {
    window_start: Instant,
    count: u32,
}

/// Counts calls per chat in a fixed window that restarts once it has elapsed
#[derive(Debug, Clone)]
pub struct ChatRateLimiter {
    config: ChatLimitConfig,
    counters: Arc<Mutex<HashMap<ChatId, ChatCounter>>>,
}

impl ChatRateLimiter {
    /// Create a limiter with the given budget
    #[must_use]
    pub fn new(config: ChatLimitConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ChatLimitConfig {
        &self.config
    }

    /// Count a call for `chat_id` and report whether it is over budget
    ///
    /// Calls made while over budget are not counted, so the chat recovers as
    /// soon as its window elapses.
    pub fn should_throttle(&self, chat_id: ChatId, now: Instant) -> bool {
        let mut map = self.counters.lock().unwrap_or_else(|e| e.into_inner());

        let counter = map.entry(chat_id).or_insert(ChatCounter {
            window_start: now,
            count: 0,
        });

        if now.saturating_duration_since(counter.window_start) > self.config.window {
            *counter = ChatCounter {
                window_start: now,
                count: 0,
            };
        }

        if counter.count >= self.config.max_requests {
            tracing::warn!(
                %chat_id,
                count = counter.count,
                window_secs = self.config.window.as_secs(),
                "rate limit reached for chat"
            );
            return true;
        }

        counter.count += 1;
        false
    }

    /// Forget chats whose window has elapsed
    pub fn cleanup(&self, now: Instant) -> usize {
        let mut map = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, c| now.saturating_duration_since(c.window_start) <= self.config.window);
        before - map.len()
    }
}
