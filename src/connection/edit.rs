//! Last-written text per message, used to skip redundant edits

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::provider::{ChatId, MessageId};

/// Remembers the last text sent to each `(chat, message)` pair
///
/// Bounded by an LRU capacity; a forgotten pair only costs one extra edit.
#[derive(Debug)]
pub struct EditCache {
    last_text: LruCache<(ChatId, MessageId), String>,
}

impl EditCache {
    /// Create a cache remembering at most `capacity` messages
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            last_text: LruCache::new(capacity),
        }
    }

    /// Whether `text` is exactly what was last written to the message
    pub fn is_unchanged(&mut self, chat_id: ChatId, message_id: MessageId, text: &str) -> bool {
        self.last_text
            .get(&(chat_id, message_id))
            .is_some_and(|last| last == text)
    }

    /// Record `text` as the latest content, returning what it replaces
    pub fn record(&mut self, chat_id: ChatId, message_id: MessageId, text: &str) -> Option<String> {
        self.last_text.put((chat_id, message_id), text.to_string())
    }

    /// Put back the content recorded before a failed edit of `written`
    ///
    /// Does nothing if another edit has recorded newer content since.
    pub fn restore(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        written: &str,
        previous: Option<String>,
    ) {
        let key = (chat_id, message_id);
        if self.last_text.peek(&key).is_some_and(|current| current != written) {
            return;
        }

        match previous {
            Some(text) => {
                self.last_text.put(key, text);
            }
            None => {
                self.last_text.pop(&key);
            }
        }
    }

    /// Number of remembered messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_text.len()
    }

    /// Whether nothing is remembered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_text.is_empty()
    }
}
