//! Network queue
//!
//! Marks identities with an unconfirmed mutation in flight so presentation can
//! show a waiting state. Counts are per identity: an item queued by two
//! requests stays queued until both are popped. Nothing expires on its own.

use std::collections::HashMap;
use void_inventory::UniqueId;

#[derive(Debug, Clone, Default)]
pub struct NetworkQueue {
    counts: HashMap<UniqueId, u32>,
}

impl NetworkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an identity once more
    pub fn push(&mut self, id: UniqueId) {
        *self.counts.entry(id).or_insert(0) += 1;
    }

    /// Drop one queue entry. Returns whether the identity is still queued.
    pub fn pop(&mut self, id: UniqueId) -> bool {
        match self.counts.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&id);
                false
            }
            None => false,
        }
    }

    pub fn push_all(&mut self, ids: &[UniqueId]) {
        for id in ids {
            self.push(*id);
        }
    }

    pub fn pop_all(&mut self, ids: &[UniqueId]) {
        for id in ids {
            self.pop(*id);
        }
    }

    /// Whether any request is waiting on the identity
    pub fn is_queued(&self, id: UniqueId) -> bool {
        self.counts.contains_key(&id)
    }

    /// Requests waiting on the identity
    pub fn depth(&self, id: UniqueId) -> u32 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Queued identities
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_inventory::{InstanceId, Serial};

    #[test]
    fn test_queue_is_ref_counted() {
        let id = UniqueId::new(Serial::PROVISIONAL, InstanceId::from_raw(1));
        let mut queue = NetworkQueue::new();
        queue.push(id);
        queue.push(id);
        assert_eq!(queue.depth(id), 2);
        assert!(queue.pop(id));
        assert!(queue.is_queued(id));
        assert!(!queue.pop(id));
        assert!(!queue.is_queued(id));
        assert!(!queue.pop(id));
        assert!(queue.is_empty());
    }
}
