//! Ordered conversation state.

use super::message::{AuthorRole, ChatMessage};
use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};

/// How a history merge treats incoming messages that do not extend the receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// The incoming history must share the receiver's messages as a prefix.
    #[default]
    RequireCommon,
    /// Messages after the longest shared prefix are appended unconditionally.
    AcceptAll,
}

/// An ordered, append-only sequence of chat messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Creates an empty history.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a history seeded with a system message.
    pub fn with_system_message(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(text)],
        }
    }

    /// Appends a message.
    #[inline]
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Appends a system message.
    pub fn add_system_message(&mut self, text: impl Into<String>) {
        self.add_message(ChatMessage::text(AuthorRole::System, text));
    }

    /// Appends a user message.
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.add_message(ChatMessage::text(AuthorRole::User, text));
    }

    /// Appends an assistant message.
    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.add_message(ChatMessage::text(AuthorRole::Assistant, text));
    }

    /// Appends several messages in order.
    pub fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, messages: I) {
        self.messages.extend(messages);
    }

    /// Merges another history into this one.
    ///
    /// The messages of `other` past the shared prefix are appended. With
    /// [`HistoryPolicy::RequireCommon`] the merge is rejected when the two histories
    /// diverge before either one ends.
    pub fn add_all(&mut self, other: &ChatHistory, policy: HistoryPolicy) -> KernelResult<()> {
        let common = self.common_prefix_len(other);
        if policy == HistoryPolicy::RequireCommon {
            self.assert_common_history(other)?;
        }
        if other.len() > common {
            tracing::debug!(
                "merging {} messages after a shared prefix of {}",
                other.len() - common,
                common
            );
            self.messages.extend_from_slice(&other.messages[common..]);
        }
        Ok(())
    }

    /// Checks that one history is a prefix of the other.
    pub fn assert_common_history(&self, other: &ChatHistory) -> KernelResult<()> {
        let common = self.common_prefix_len(other);
        if common < self.len().min(other.len()) {
            return Err(KernelError::HistoryMismatch { index: common });
        }
        Ok(())
    }

    fn common_prefix_len(&self, other: &ChatHistory) -> usize {
        self.messages
            .iter()
            .zip(other.messages.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Returns the last message.
    #[inline]
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Replaces the last message, returning it. Appends if the history is empty.
    pub fn replace_last_message(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        match self.messages.last_mut() {
            Some(last) => Some(std::mem::replace(last, message)),
            None => {
                self.messages.push(message);
                None
            }
        }
    }

    /// Removes all messages.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Returns the messages in conversation order.
    #[inline]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Iterates over the messages.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the history is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<ChatMessage>> for ChatHistory {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

impl IntoIterator for ChatHistory {
    type Item = ChatMessage;
    type IntoIter = std::vec::IntoIter<ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChatHistory {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
