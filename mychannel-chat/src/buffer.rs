//! Bounded chat history.
//!
//! Fixed capacity, oldest-first eviction. Ids are unique: inserting a
//! message whose id is already present replaces that entry where it
//! stands instead of appending a duplicate.

use std::collections::VecDeque;

use crate::model::{ChatMessage, ModerationAction};

/// Default number of messages kept in memory.
pub const DEFAULT_BUFFER_CAPACITY: usize = 200;

/// Result of inserting into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Insert {
    /// Appended at the tail, possibly evicting the oldest entry.
    Appended { evicted: Option<ChatMessage> },
    /// An entry with the same id was replaced in place.
    Replaced,
}

/// Result of applying a moderation action locally.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    Removed(ChatMessage),
    Updated(ChatMessage),
    /// Target absent or already in the requested state.
    Unchanged,
}

/// FIFO-evicting message store.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a message, reconciling by id.
    pub fn insert(&mut self, message: ChatMessage) -> Insert {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *slot = message;
            return Insert::Replaced;
        }

        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        Insert::Appended { evicted }
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Remove a message by id.
    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(index)
    }

    /// Replace the entry with `id` by `f(entry)` if that changes it.
    pub fn replace_with<F>(&mut self, id: &str, f: F) -> Option<ChatMessage>
    where
        F: FnOnce(&ChatMessage) -> ChatMessage,
    {
        let slot = self.messages.iter_mut().find(|m| m.id == id)?;
        let updated = f(slot);
        if updated == *slot {
            return None;
        }
        *slot = updated.clone();
        Some(updated)
    }

    /// Apply a moderation action to the local view.
    ///
    /// Idempotent: deleting an absent id or pinning a pinned message is a
    /// no-op.
    pub fn apply_moderation(&mut self, id: &str, action: ModerationAction) -> ModerationOutcome {
        let updated = match action {
            ModerationAction::Delete => {
                return match self.remove(id) {
                    Some(removed) => ModerationOutcome::Removed(removed),
                    None => ModerationOutcome::Unchanged,
                };
            }
            ModerationAction::Highlight => self.replace_with(id, ChatMessage::highlighted),
            ModerationAction::Pin => self.replace_with(id, |m| m.pinned(true)),
            ModerationAction::Unpin => self.replace_with(id, |m| m.pinned(false)),
            ModerationAction::Timeout | ModerationAction::Ban => {
                self.replace_with(id, ChatMessage::moderated)
            }
        };
        match updated {
            Some(message) => ModerationOutcome::Updated(message),
            None => ModerationOutcome::Unchanged,
        }
    }

    /// Oldest-first copy of the buffer.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// The newest `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Currently pinned messages, oldest first.
    pub fn pinned(&self) -> Vec<ChatMessage> {
        self.messages.iter().filter(|m| m.is_pinned).cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
