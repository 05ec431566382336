//! The ordered message queue and its current-index invariant.
//!
//! Order is presentation order. The `current` index, when present, always
//! satisfies `0 <= i < len`; every mutation re-derives it so the invariant
//! holds after the operation, not merely when it happens to survive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Message;

/// Ordered sequence of messages with an optional active ("current") slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageQueue {
    pub name: String,
    messages: Vec<Message>,
    current: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            messages: Vec::new(),
            current: None,
            created_at: now,
            modified_at: now,
        }
    }

    // ── Read access ──────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Find a message by identity.
    pub fn find(&self, id: &Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Message> {
        self.current.and_then(|i| self.messages.get(i))
    }

    // ── Mutation (each re-derives the current index) ─────────────

    /// Point `current` at `index`. Returns `false` (unchanged) when the
    /// index is out of range.
    pub fn set_current(&mut self, index: Option<usize>) -> bool {
        match index {
            Some(i) if i >= self.messages.len() => false,
            other => {
                self.current = other;
                self.touch();
                true
            }
        }
    }

    /// Append a message at the end.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Insert at `index` (clamped to the queue length). The current index
    /// shifts right when the insertion lands at or before it.
    pub fn insert(&mut self, index: usize, message: Message) {
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
        if let Some(c) = self.current
            && index <= c
        {
            self.current = Some(c + 1);
        }
        self.touch();
    }

    /// Remove and return the message at `index`.
    ///
    /// When the current message itself is removed, the index stays in
    /// place (now naming the next message), clamped to the new tail, and
    /// becomes `None` when the queue empties.
    pub fn remove(&mut self, index: usize) -> Option<Message> {
        if index >= self.messages.len() {
            return None;
        }
        let removed = self.messages.remove(index);
        self.current = match self.current {
            Some(_) if self.messages.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) => Some(c.min(self.messages.len() - 1)),
            None => None,
        };
        self.touch();
        Some(removed)
    }

    /// Move a message from `from` to `to` (both positions in the current
    /// ordering; `to` is clamped). The current index follows the message
    /// it pointed at. Returns `false` when `from` is out of range.
    pub fn move_message(&mut self, from: usize, to: usize) -> bool {
        if from >= self.messages.len() {
            return false;
        }
        let to = to.min(self.messages.len() - 1);
        let message = self.messages.remove(from);
        self.messages.insert(to, message);
        self.current = self.current.map(|c| {
            if c == from {
                to
            } else {
                let mut c2 = c;
                if from < c2 {
                    c2 -= 1;
                }
                if to <= c2 {
                    c2 += 1;
                }
                c2
            }
        });
        self.touch();
        true
    }

    /// Mark the message with `id` as sent at `at`.
    ///
    /// Idempotent: re-applying the same notice leaves the queue in the
    /// same state, because the underlying peer transport may redeliver on
    /// reconnect. Returns `false` when no message matches.
    pub fn mark_sent(&mut self, id: &Uuid, at: DateTime<Utc>) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                // Re-applying the exact same notice must not even bump
                // the modified timestamp.
                if !(message.sent && message.last_sent == Some(at)) {
                    message.mark_sent(at);
                    self.touch();
                }
                true
            }
            None => false,
        }
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(n: usize) -> MessageQueue {
        let mut q = MessageQueue::new("test");
        for i in 0..n {
            q.push(Message::new(format!("msg {i}")));
        }
        q
    }

    fn assert_invariant(q: &MessageQueue) {
        if let Some(i) = q.current_index() {
            assert!(i < q.len(), "current {i} out of range (len {})", q.len());
        }
    }

    #[test]
    fn set_current_bounds() {
        let mut q = queue_of(3);
        assert!(q.set_current(Some(2)));
        assert_eq!(q.current_index(), Some(2));
        assert!(!q.set_current(Some(3)));
        assert_eq!(q.current_index(), Some(2));
        assert!(q.set_current(None));
        assert_eq!(q.current_index(), None);
    }

    #[test]
    fn insert_before_current_shifts_it() {
        let mut q = queue_of(3);
        q.set_current(Some(1));
        let marker = q.get(1).unwrap().id;

        q.insert(0, Message::new("front"));
        assert_eq!(q.current_index(), Some(2));
        assert_eq!(q.current().unwrap().id, marker);

        q.insert(5, Message::new("back"));
        assert_eq!(q.current_index(), Some(2));
        assert_invariant(&q);
    }

    #[test]
    fn remove_before_current_shifts_it() {
        let mut q = queue_of(4);
        q.set_current(Some(2));
        let marker = q.get(2).unwrap().id;

        q.remove(0);
        assert_eq!(q.current_index(), Some(1));
        assert_eq!(q.current().unwrap().id, marker);
    }

    #[test]
    fn remove_current_points_at_next() {
        let mut q = queue_of(3);
        q.set_current(Some(1));
        let next = q.get(2).unwrap().id;

        q.remove(1);
        assert_eq!(q.current_index(), Some(1));
        assert_eq!(q.current().unwrap().id, next);
    }

    #[test]
    fn remove_current_at_tail_clamps() {
        let mut q = queue_of(3);
        q.set_current(Some(2));
        q.remove(2);
        assert_eq!(q.current_index(), Some(1));
        assert_invariant(&q);
    }

    #[test]
    fn remove_last_message_clears_current() {
        let mut q = queue_of(1);
        q.set_current(Some(0));
        q.remove(0);
        assert!(q.is_empty());
        assert_eq!(q.current_index(), None);
    }

    #[test]
    fn remove_out_of_range_is_noop() {
        let mut q = queue_of(2);
        assert!(q.remove(5).is_none());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn move_follows_current_message() {
        let mut q = queue_of(4);
        q.set_current(Some(1));
        let marker = q.get(1).unwrap().id;

        assert!(q.move_message(1, 3));
        assert_eq!(q.current_index(), Some(3));
        assert_eq!(q.current().unwrap().id, marker);

        // Moving another message across the current one shifts it back.
        assert!(q.move_message(0, 3));
        assert_eq!(q.current().unwrap().id, marker);
        assert_invariant(&q);
    }

    #[test]
    fn move_out_of_range_rejected() {
        let mut q = queue_of(2);
        assert!(!q.move_message(2, 0));
    }

    #[test]
    fn mark_sent_is_idempotent() {
        let mut q = queue_of(2);
        let id = q.get(0).unwrap().id;
        let at = Utc::now();

        assert!(q.mark_sent(&id, at));
        let first = q.clone();
        assert!(q.mark_sent(&id, at));
        assert_eq!(q, first);

        assert!(!q.mark_sent(&Uuid::new_v4(), at));
    }

    #[test]
    fn invariant_holds_across_mixed_operation_sequence() {
        // Deterministic pseudo-random walk over all mutation kinds.
        let mut q = queue_of(3);
        q.set_current(Some(1));
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for step in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let op = seed % 5;
            let a = (seed >> 16) as usize % (q.len() + 1);
            let b = (seed >> 32) as usize % (q.len() + 1);
            match op {
                0 => q.push(Message::new(format!("s{step}"))),
                1 => q.insert(a, Message::new(format!("i{step}"))),
                2 => {
                    q.remove(a);
                }
                3 => {
                    if !q.is_empty() {
                        q.move_message(a.min(q.len() - 1), b);
                    }
                }
                _ => {
                    let idx = if q.is_empty() { None } else { Some(a.min(q.len() - 1)) };
                    q.set_current(idx);
                }
            }
            assert_invariant(&q);
        }
    }
}
