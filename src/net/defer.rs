//! Deferred finalization queue.
//!
//! Connections land here when they close or when they buffer output during a
//! loop turn. The worker drains the queue once per turn, outside every protocol
//! callback, so nothing is freed while a caller up the stack still refers to it.
//!
//! Membership is tracked by a flag owned by the connection itself, which keeps
//! enqueueing idempotent without a lookup.

use std::collections::VecDeque;

use crate::net::connection::ConnectionId;

/// Per-worker queue of connections awaiting the end-of-turn pass.
#[derive(Debug, Default)]
pub struct DeferQueue {
    queue: VecDeque<ConnectionId>,
}

impl DeferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `id` unless `linked` says it is already queued.
    /// Returns true if the connection was added.
    pub fn schedule(&mut self, id: ConnectionId, linked: &mut bool) -> bool {
        if *linked {
            return false;
        }
        *linked = true;
        self.queue.push_back(id);
        true
    }

    /// Take the next queued connection. The caller clears its membership flag.
    pub fn pop(&mut self) -> Option<ConnectionId> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.queue.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_idempotent() {
        let mut queue = DeferQueue::new();
        let id = ConnectionId::new();
        let mut linked = false;

        assert!(queue.schedule(id, &mut linked));
        assert!(!queue.schedule(id, &mut linked));
        assert!(!queue.schedule(id, &mut linked));
        assert_eq!(queue.len(), 1);
        assert!(linked);
    }

    #[test]
    fn drains_in_order() {
        let mut queue = DeferQueue::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let (mut la, mut lb) = (false, false);
        queue.schedule(a, &mut la);
        queue.schedule(b, &mut lb);

        assert_eq!(queue.pop(), Some(a));
        assert_eq!(queue.pop(), Some(b));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_after_pop() {
        let mut queue = DeferQueue::new();
        let id = ConnectionId::new();
        let mut linked = false;
        queue.schedule(id, &mut linked);
        queue.pop();
        linked = false;
        assert!(queue.schedule(id, &mut linked));
        assert!(queue.contains(id));
    }
}
