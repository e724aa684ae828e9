//! Thread registry (spec.md §4.E): maps a caller conversation id to a
//! child-side thread id, bounded and cleared wholesale on overflow.
//!
//! Deliberately given its own independent lock rather than sharing "the
//! façade mutex" literally (see DESIGN.md, Open Question 2): its lock is
//! only ever held for a HashMap operation, never across an `.await`, which
//! satisfies spec.md §4.G's "must not be held across any blocking RPC call"
//! regardless of which mutex instance is used.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

const EMPTY_CONVERSATION_SENTINEL: &str = "__default__";

pub struct ThreadRegistry {
    capacity: usize,
    map: Mutex<HashMap<String, String>>,
}

impl ThreadRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: Mutex::new(HashMap::new()),
        }
    }

    fn normalize(conversation_id: &str) -> String {
        if conversation_id.is_empty() {
            EMPTY_CONVERSATION_SENTINEL.to_string()
        } else {
            conversation_id.to_string()
        }
    }

    pub fn lookup(&self, conversation_id: &str) -> Option<String> {
        let key = Self::normalize(conversation_id);
        self.map.lock().expect("thread registry poisoned").get(&key).cloned()
    }

    /// Insert a mapping, evicting the entire map first if this insert would
    /// exceed capacity (spec.md §4.E: "when size reaches 100 on insert,
    /// evict the entire map before inserting").
    pub fn insert(&self, conversation_id: &str, thread_id: String) {
        let key = Self::normalize(conversation_id);
        let mut map = self.map.lock().expect("thread registry poisoned");
        if map.len() >= self.capacity && !map.contains_key(&key) {
            debug!(capacity = self.capacity, "thread registry at capacity; evicting all entries");
            map.clear();
        }
        map.insert(key, thread_id);
    }

    /// Clear every mapping. Called when the supervisor detects child death
    /// (spec.md "Lifecycle summary").
    pub fn clear(&self) {
        self.map.lock().expect("thread registry poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("thread registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_miss_returns_none() {
        let registry = ThreadRegistry::new(100);
        assert_eq!(registry.lookup("conv-1"), None);
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let registry = ThreadRegistry::new(100);
        registry.insert("conv-1", "thread-1".to_string());
        assert_eq!(registry.lookup("conv-1"), Some("thread-1".to_string()));
    }

    #[test]
    fn empty_conversation_id_uses_sentinel() {
        let registry = ThreadRegistry::new(100);
        registry.insert("", "thread-default".to_string());
        assert_eq!(registry.lookup(""), Some("thread-default".to_string()));
    }

    #[test]
    fn never_exceeds_capacity() {
        let registry = ThreadRegistry::new(4);
        for i in 0..20 {
            registry.insert(&format!("conv-{i}"), format!("thread-{i}"));
            assert!(registry.len() <= 4, "registry exceeded capacity at i={i}");
        }
    }

    #[test]
    fn overflow_clears_wholesale_rather_than_evicting_one() {
        let registry = ThreadRegistry::new(2);
        registry.insert("conv-1", "thread-1".to_string());
        registry.insert("conv-2", "thread-2".to_string());
        registry.insert("conv-3", "thread-3".to_string());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("conv-1"), None);
        assert_eq!(registry.lookup("conv-2"), None);
        assert_eq!(registry.lookup("conv-3"), Some("thread-3".to_string()));
    }
}
