use crate::arena::{Arena, Node, NIL};
use crate::traits::{CacheStats, EvictionPolicy, Expiring};
use std::collections::HashMap;
use std::sync::Arc;

/// SIEVE eviction (NSDI '24).
///
/// A "hand" walks from tail toward head looking for a victim. Visited entries
/// have their bit cleared and stay where they are; the first unvisited entry is
/// evicted. New entries always go in at the head.
///
/// Hits only flip a bit, so the list is never reordered on the read path.
pub struct SieveCache<V> {
    arena: Arena<V>,
    map: HashMap<String, u32>,
    hand: u32,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> SieveCache<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            arena: Arena::new(capacity),
            map: HashMap::with_capacity(capacity),
            hand: NIL,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Unlink `index`, keeping the hand valid.
    fn unlink(&mut self, index: u32) -> Option<Node<V>> {
        if self.hand == index {
            self.hand = self.arena.get(index).map_or(NIL, |n| n.prev);
        }
        let node = self.arena.remove(index)?;
        self.map.remove(&node.key);
        Some(node)
    }

    /// Expired entries are evicted regardless of their visited bit. The hand
    /// wraps back to the tail when it runs off the head.
    fn evict_one(&mut self) {
        loop {
            if self.hand == NIL {
                self.hand = self.arena.tail;
            }
            if self.hand == NIL {
                return;
            }

            let index = self.hand;
            let Some(node) = self.arena.get(index) else {
                self.hand = NIL;
                return;
            };

            if node.entry.is_expired() {
                self.unlink(index);
                self.expirations += 1;
                return;
            }

            if node.clear_visited() {
                self.hand = node.prev;
                continue;
            }

            self.unlink(index);
            self.evictions += 1;
            return;
        }
    }
}

impl<V: Send + Sync> EvictionPolicy for SieveCache<V> {
    type Value = V;

    fn get(&mut self, key: &str) -> Option<Arc<V>> {
        let Some(&index) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };
        let node = self.arena.get(index)?;
        if node.entry.is_expired() {
            self.misses += 1;
            self.expirations += 1;
            self.unlink(index);
            return None;
        }
        self.hits += 1;
        node.mark_visited();
        Some(Arc::clone(&node.entry.value))
    }

    fn insert(&mut self, key: String, value: Expiring<V>) {
        if let Some(&old) = self.map.get(&key) {
            self.unlink(old);
        }

        while self.arena.len() >= self.capacity {
            self.evict_one();
        }

        let node = Node::new(key.clone(), value);
        if let Some(index) = self.arena.push_head(node) {
            self.map.insert(key, index);
        }
    }

    fn len(&self) -> usize {
        self.arena.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn name(&self) -> &'static str {
        "SIEVE"
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            current_size: self.arena.len(),
            capacity: self.capacity,
        }
    }
}
