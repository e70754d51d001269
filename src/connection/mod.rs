//! Per-resource admission control for calls into the messaging client
//!
//! [`ConnectionManager`] serializes operations that target the same
//! [`ResourceKey`], keeps each key under a requests-per-minute ceiling,
//! spaces reconnects, caches fetched messages for a while, and skips edits
//! that would not change anything.
//!
//! Construct one manager at startup and share it behind an `Arc`.

pub mod cache;
pub mod edit;
pub mod rate_window;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::{SharedClock, TokioClock, instant_after, jittered};
use crate::provider::{ChatId, Classify, ErrorKind, Message, MessageEditor, MessageId};
use crate::{Error, Result};

pub use cache::MessageCache;
pub use edit::EditCache;
pub use rate_window::RateWindow;

/// Name of an external resource that must not be hammered concurrently
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build a key from a caller-chosen identifier
    ///
    /// # Errors
    ///
    /// Returns error if the identifier is empty or only whitespace
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::InvalidResourceKey(
                "resource key must not be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Key guarding a chat
    #[must_use]
    pub fn chat(chat_id: ChatId) -> Self {
        Self(format!("chat:{chat_id}"))
    }

    /// Key guarding a user's userbot session
    #[must_use]
    pub fn session(user_id: i64) -> Self {
        Self(format!("session:{user_id}"))
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Tunables for [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Lifetime of a cached message
    pub cache_ttl: Duration,
    /// Active holders per key above which a warning is logged
    pub max_concurrent_connections: usize,
    /// Admissions per key per `rate_window`
    pub max_requests_per_minute: usize,
    /// Length of the sliding rate window
    pub rate_window: Duration,
    /// Jitter ratio applied to rate-limit waits
    pub rate_jitter: f64,
    /// Added to every rate-limit wait
    pub rate_wait_buffer: Duration,
    /// Minimum time between two accesses to the same key
    pub min_connection_interval: Duration,
    /// Pause after taking the key's lock, before running the operation
    pub lock_spacing: Duration,
    /// Messages remembered for edit suppression
    pub edit_cache_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            max_concurrent_connections: 2,
            max_requests_per_minute: 15,
            rate_window: Duration::from_secs(60),
            rate_jitter: 0.1,
            rate_wait_buffer: Duration::from_secs(1),
            min_connection_interval: Duration::from_secs(1),
            lock_spacing: Duration::from_millis(500),
            edit_cache_capacity: 10_000,
        }
    }
}

/// What a [`ConnectionManager::sweep`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired cached messages dropped
    pub expired_messages: usize,
    /// Idle per-key slots dropped
    pub idle_slots: usize,
}

#[derive(Debug)]
struct SlotTiming {
    window: RateWindow,
    last_access: Option<Instant>,
}

/// Per-key coordination state
#[derive(Debug)]
struct ConnectionSlot {
    lock: tokio::sync::Mutex<()>,
    active: AtomicUsize,
    timing: Mutex<SlotTiming>,
}

impl ConnectionSlot {
    fn new(config: &ConnectionConfig) -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            active: AtomicUsize::new(0),
            timing: Mutex::new(SlotTiming {
                window: RateWindow::new(config.max_requests_per_minute, config.rate_window),
                last_access: None,
            }),
        }
    }

    fn timing(&self) -> MutexGuard<'_, SlotTiming> {
        self.timing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decrements the active counter however the guarded call ends
struct ActiveGuard<'a> {
    slot: &'a ConnectionSlot,
    key: &'a ResourceKey,
}

impl<'a> ActiveGuard<'a> {
    fn enter(slot: &'a ConnectionSlot, key: &'a ResourceKey, soft_max: usize) -> Self {
        let active = slot.active.fetch_add(1, Ordering::SeqCst) + 1;
        if active > soft_max {
            tracing::warn!(key = %key, active, soft_max, "many callers queued on one resource");
        } else {
            tracing::debug!(key = %key, active, "active connections");
        }
        Self { slot, key }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let active = self.slot.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::debug!(key = %self.key, active, "active connections");
    }
}

/// Admission control, message cache and edit suppression for one process
pub struct ConnectionManager<M = Message> {
    config: ConnectionConfig,
    clock: SharedClock,
    slots: Mutex<HashMap<ResourceKey, Arc<ConnectionSlot>>>,
    cache: Mutex<MessageCache<M>>,
    edits: Mutex<EditCache>,
}

impl<M> fmt::Debug for ConnectionManager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<M: Clone> Default for ConnectionManager<M> {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl<M: Clone> ConnectionManager<M> {
    /// Create a manager driven by the tokio timer
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a manager with an explicit clock
    #[must_use]
    pub fn with_clock(config: ConnectionConfig, clock: SharedClock) -> Self {
        let cache = MessageCache::new(config.cache_ttl);
        let edits = EditCache::new(config.edit_cache_capacity);
        Self {
            config,
            clock,
            slots: Mutex::new(HashMap::new()),
            cache: Mutex::new(cache),
            edits: Mutex::new(edits),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Run `operation` once `key` admits another request
    ///
    /// Waits for the key's rate window, then for the minimum connection
    /// interval, then for the key's lock. Only one operation per key runs at
    /// a time; different keys do not block each other. The operation's
    /// output, including any error it carries, is returned unchanged.
    pub async fn with_connection_lock<F, Fut, T>(&self, key: &ResourceKey, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(key);

        self.wait_for_rate_window(key, &slot).await;
        self.wait_for_interval(key, &slot).await;

        let _active = ActiveGuard::enter(&slot, key, self.config.max_concurrent_connections);
        let _held = slot.lock.lock().await;

        // Desynchronize callers released together by the waits above
        if !self.config.lock_spacing.is_zero() {
            self.clock.sleep(self.config.lock_spacing).await;
        }

        operation().await
    }

    /// Number of callers currently inside `with_connection_lock` for `key`
    #[must_use]
    pub fn active_connections(&self, key: &ResourceKey) -> usize {
        self.slots()
            .get(key)
            .map_or(0, |slot| slot.active.load(Ordering::SeqCst))
    }

    /// Admissions for `key` still counted in its rate window
    #[must_use]
    pub fn pending_requests(&self, key: &ResourceKey) -> usize {
        let Some(slot) = self.slots().get(key).cloned() else {
            return 0;
        };
        let mut timing = slot.timing();
        timing.window.prune(self.clock.now());
        timing.window.len()
    }

    /// Cache a fetched message under `key`
    pub fn cache_message(&self, key: &str, message: M) {
        let now = self.clock.now();
        self.cache().insert(key, message, now);
    }

    /// Cached message for `key`, if present and not expired
    #[must_use]
    pub fn get_cached_message(&self, key: &str) -> Option<M> {
        let now = self.clock.now();
        self.cache().get(key, now)
    }

    /// Drop every cached message
    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    /// Drop expired cached messages, returning how many were removed
    pub fn clear_expired_cache(&self) -> usize {
        let now = self.clock.now();
        let removed = self.cache().clear_expired(now);
        if removed > 0 {
            tracing::debug!(removed, "cleared expired message cache entries");
        }
        removed
    }

    /// Edit a message unless it already shows `new_text`
    ///
    /// Returns `Ok(None)` without calling the client when the last text
    /// written through this manager to the same message is identical.
    ///
    /// # Errors
    ///
    /// Returns the client's error if the edit fails
    pub async fn safe_edit_message_text<C>(
        &self,
        client: &C,
        chat_id: ChatId,
        message_id: MessageId,
        new_text: &str,
    ) -> std::result::Result<Option<C::Edited>, C::Error>
    where
        C: MessageEditor + ?Sized,
    {
        let previous = {
            let mut edits = self.edits();
            if edits.is_unchanged(chat_id, message_id, new_text) {
                tracing::debug!(%chat_id, %message_id, "skipping edit: content unchanged");
                return Ok(None);
            }
            edits.record(chat_id, message_id, new_text)
        };

        match client.edit_message_text(chat_id, message_id, new_text).await {
            Ok(edited) => Ok(Some(edited)),
            Err(e) => {
                let kind = e.kind();
                if kind != ErrorKind::NoOp {
                    self.edits().restore(chat_id, message_id, new_text, previous);
                }
                tracing::error!(%chat_id, %message_id, kind = kind.label(), "error editing message");
                Err(e)
            }
        }
    }

    /// Drop expired cache entries and slots nobody is using
    ///
    /// Meant to be called periodically by the host process.
    pub fn sweep(&self) -> SweepReport {
        let expired_messages = self.clear_expired_cache();

        let now = self.clock.now();
        let interval = self.config.min_connection_interval;
        let mut slots = self.slots();
        let before = slots.len();

        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 || slot.active.load(Ordering::SeqCst) > 0 {
                return true;
            }
            let mut timing = slot.timing();
            timing.window.prune(now);
            let spaced = timing
                .last_access
                .is_none_or(|last| now.saturating_duration_since(last) >= interval);
            !(timing.window.is_empty() && spaced)
        });

        let idle_slots = before - slots.len();
        drop(slots);

        if expired_messages > 0 || idle_slots > 0 {
            tracing::info!(expired_messages, idle_slots, "connection manager sweep");
        }

        SweepReport {
            expired_messages,
            idle_slots,
        }
    }

    fn slot(&self, key: &ResourceKey) -> Arc<ConnectionSlot> {
        let mut slots = self.slots();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ConnectionSlot::new(&self.config))),
        )
    }

    /// Block until the key's sliding window has room, then record the admission
    async fn wait_for_rate_window(&self, key: &ResourceKey, slot: &ConnectionSlot) {
        loop {
            let until_free = {
                let mut timing = slot.timing();
                match timing.window.try_admit(self.clock.now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };

            let wait = jittered(until_free, self.config.rate_jitter)
                .saturating_add(self.config.rate_wait_buffer);
            tracing::warn!(
                key = %key,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "rate limit exceeded, waiting"
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Reserve the key's next access slot and sleep until it arrives
    async fn wait_for_interval(&self, key: &ResourceKey, slot: &ConnectionSlot) {
        let wait = {
            let mut timing = slot.timing();
            let now = self.clock.now();
            let scheduled = timing.last_access.map_or(now, |last| {
                instant_after(last, self.config.min_connection_interval).max(now)
            });
            timing.last_access = Some(scheduled);
            scheduled.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tracing::debug!(
                key = %key,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "spacing connections"
            );
            self.clock.sleep(wait).await;
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ResourceKey, Arc<ConnectionSlot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, MessageCache<M>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn edits(&self) -> MutexGuard<'_, EditCache> {
        self.edits.lock().unwrap_or_else(|e| e.into_inner())
    }
}
