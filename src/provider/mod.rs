//! Narrow interfaces to the messaging client collaborator
//!
//! The Telegram client itself lives outside this crate. The resilience core
//! only needs to edit a message, classify the client's errors, and find the
//! chat an operation targets.

pub mod error;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{Classify, ErrorKind, ProviderError, TimedOut};

/// Telegram chat identifier (negative for groups and channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Message identifier, unique within a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for MessageId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// A message fetched from a source chat, as kept in the message cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Chat the message belongs to
    pub chat_id: ChatId,
    /// Message identifier
    pub id: MessageId,
    /// Text or caption
    #[serde(default)]
    pub text: Option<String>,
    /// Provider file reference for attached media
    #[serde(default)]
    pub media_file_id: Option<String>,
}

/// The edit operation of the messaging client
#[async_trait]
pub trait MessageEditor: Send + Sync {
    /// What a successful edit returns
    type Edited: Send;
    /// Error raised by the client
    type Error: Classify + Send;

    /// Replace the text of an existing message
    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Self::Edited, Self::Error>;
}

/// Arguments that may expose the chat an operation targets
///
/// The retry executor feeds this into its per-chat soft limiter.
pub trait ChatScoped {
    /// Chat targeted by the call, if known
    fn chat_id(&self) -> Option<ChatId>;
}

impl ChatScoped for () {
    fn chat_id(&self) -> Option<ChatId> {
        None
    }
}

impl ChatScoped for ChatId {
    fn chat_id(&self) -> Option<ChatId> {
        Some(*self)
    }
}

impl ChatScoped for Option<ChatId> {
    fn chat_id(&self) -> Option<ChatId> {
        *self
    }
}

impl ChatScoped for Message {
    fn chat_id(&self) -> Option<ChatId> {
        Some(self.chat_id)
    }
}

impl<T: ChatScoped + ?Sized> ChatScoped for &T {
    fn chat_id(&self) -> Option<ChatId> {
        (**self).chat_id()
    }
}

impl<T: ChatScoped + ?Sized> ChatScoped for std::sync::Arc<T> {
    fn chat_id(&self) -> Option<ChatId> {
        (**self).chat_id()
    }
}

/// Only the first element of a tuple is inspected
impl<A: ChatScoped, B> ChatScoped for (A, B) {
    fn chat_id(&self) -> Option<ChatId> {
        self.0.chat_id()
    }
}

impl<A: ChatScoped, B, C> ChatScoped for (A, B, C) {
    fn chat_id(&self) -> Option<ChatId> {
        self.0.chat_id()
    }
}
