//! savebot - resilience core for a restricted-content relay bot
//!
//! The bot copies messages out of restricted Telegram chats on behalf of its
//! users, through a per-user logged-in client session. Everything it sends to
//! Telegram passes through two service objects from this crate:
//!
//! - [`ConnectionManager`]: per-resource locking, a sliding-window request
//!   ceiling, reconnect spacing, a TTL message cache and redundant-edit
//!   suppression
//! - [`RetryExecutor`]: error classification, flood-wait handling and
//!   exponential backoff with jitter, plus a per-chat soft limiter
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        command handlers / transfer jobs       │
//! └───────────┬──────────────────────┬───────────┘
//!             │                      │
//! ┌───────────▼──────────┐ ┌─────────▼───────────┐
//! │  ConnectionManager   │ │    RetryExecutor    │
//! │ lock │ window │ cache│ │ classify │ backoff  │
//! └───────────┬──────────┘ └─────────┬───────────┘
//!             │                      │
//! ┌───────────▼──────────────────────▼───────────┐
//! │      messaging client (MessageEditor)         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The two never call each other; callers compose them.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod provider;
pub mod retry;

#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use clock::{Clock, SharedClock, TokioClock};
pub use config::Config;
pub use connection::{ConnectionConfig, ConnectionManager, ResourceKey, SweepReport};
pub use error::{Error, Result};
pub use provider::{
    ChatId, ChatScoped, Classify, ErrorKind, Message, MessageEditor, MessageId, ProviderError,
    TimedOut,
};
pub use retry::{
    ChatLimitConfig, RetryExecutor, RetryPolicy, Retrying, backoff_delay, exponential_backoff,
    run_with_lock, run_with_timeout,
};
