//! Outbound queue for messages awaiting (re)delivery.
//!
//! Messages whose transmission failed are kept here in `send` order and
//! replayed after the next successful connection. Entries that fail again
//! go back to the front so ordering is preserved across cycles.

use std::collections::VecDeque;
use tokio::time::Instant;

use crate::model::ChatMessage;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: ChatMessage,
    pub queued_at: Instant,
    /// Delivery attempts made so far, including the original send.
    pub attempts: u32,
}

/// FIFO of undelivered chat messages.
#[derive(Debug)]
pub struct OutboundQueue {
    queue: VecDeque<QueuedMessage>,
    max_size: usize,
}

impl OutboundQueue {
    /// Create a new queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a message after its first failed attempt.
    ///
    /// Returns `false` when the queue is full and the message was dropped.
    pub fn enqueue(&mut self, message: ChatMessage) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedMessage {
            message,
            queued_at: Instant::now(),
            attempts: 1,
        });
        true
    }

    /// Take every queued entry, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.queue.drain(..).collect()
    }

    /// Put entries that failed again back at the front, keeping their order.
    pub fn restore_front(&mut self, entries: Vec<QueuedMessage>) {
        for mut entry in entries.into_iter().rev() {
            entry.attempts += 1;
            self.queue.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Queued messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.queue.iter().map(|q| q.message.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> ChatMessage {
        ChatMessage::new("abc", "u1", "alice", content)
    }

    #[test]
    fn test_queue_fifo() {
        let mut queue = OutboundQueue::new(100);
        assert!(queue.is_empty());

        queue.enqueue(msg("one"));
        queue.enqueue(msg("two"));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        let contents: Vec<_> = drained.iter().map(|q| q.message.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_capacity() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.enqueue(msg("1")));
        assert!(queue.enqueue(msg("2")));
        assert!(!queue.enqueue(msg("3")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_restore_front_keeps_order() {
        let mut queue = OutboundQueue::new(10);
        queue.enqueue(msg("a"));
        queue.enqueue(msg("b"));
        let failed = queue.drain();

        queue.enqueue(msg("c"));
        queue.restore_front(failed);

        let contents: Vec<_> = queue.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(queue.drain()[0].attempts, 2);
    }

    #[test]
    fn test_queue_clear() {
        let mut queue = OutboundQueue::new(10);
        queue.enqueue(msg("a"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
