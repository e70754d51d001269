//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::{Ready, ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use savebot::{ChatId, ManualClock, Message, MessageEditor, MessageId, ProviderError};

/// Create a virtual clock for retry and admission tests
#[must_use]
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new())
}

/// Messaging client that records edits and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingEditor {
    edits: Mutex<Vec<(ChatId, MessageId, String)>>,
    failures: Mutex<VecDeque<ProviderError>>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next edit fail with `error`
    pub fn fail_next(&self, error: ProviderError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Edits that reached the client
    pub fn edits(&self) -> Vec<(ChatId, MessageId, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageEditor for RecordingEditor {
    type Edited = Message;
    type Error = ProviderError;

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, ProviderError> {
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.edits
            .lock()
            .unwrap()
            .push((chat_id, message_id, text.to_string()));

        Ok(Message {
            chat_id,
            id: message_id,
            text: Some(text.to_string()),
            media_file_id: None,
        })
    }
}

/// Provider call that replays scripted outcomes, then succeeds with `fallback`
#[derive(Debug)]
pub struct ScriptedCall<T> {
    outcomes: Mutex<VecDeque<Result<T, ProviderError>>>,
    fallback: T,
    calls: AtomicU32,
}

impl<T: Clone> ScriptedCall<T> {
    pub fn new(outcomes: Vec<Result<T, ProviderError>>, fallback: T) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    /// Issue one call
    pub fn call(&self) -> Ready<Result<T, ProviderError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        ready(next)
    }

    /// Calls issued so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A source-chat message as the relay would cache it
pub fn sample_message(chat: i64, id: i32) -> Message {
    Message {
        chat_id: ChatId(chat),
        id: MessageId(id),
        text: Some(format!("message {id} from {chat}")),
        media_file_id: None,
    }
}
