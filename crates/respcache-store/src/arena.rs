use crate::traits::Expiring;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel index meaning "no node".
pub const NIL: u32 = u32::MAX;

/// A node in the arena-allocated doubly-linked list.
pub struct Node<V> {
    pub key: String,
    pub entry: Expiring<V>,
    pub visited: AtomicBool,
    pub prev: u32,
    pub next: u32,
}

impl<V> Node<V> {
    pub fn new(key: String, entry: Expiring<V>) -> Self {
        Self {
            key,
            entry,
            visited: AtomicBool::new(false),
            prev: NIL,
            next: NIL,
        }
    }

    #[inline]
    pub fn mark_visited(&self) {
        self.visited.store(true, Ordering::Relaxed);
    }

    /// Clear the visited bit, returning its previous value.
    #[inline]
    pub fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::Relaxed)
    }

    #[inline]
    pub fn is_visited(&self) -> bool {
        self.visited.load(Ordering::Relaxed)
    }
}

/// Arena-allocated doubly-linked list.
///
/// Slots live in a `Vec<Option<Node>>` and `u32` indices act as pointers.
/// Reclaimed slots go on a free list so allocation stays O(1).
pub struct Arena<V> {
    slots: Vec<Option<Node<V>>>,
    free_list: Vec<u32>,
    pub head: u32,
    pub tail: u32,
    len: usize,
}

impl<V> Arena<V> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        // Reverse so that slot 0 is handed out first.
        let free_list = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free_list,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&Node<V>> {
        self.slots.get(index as usize).and_then(|s| s.as_ref())
    }

    fn link_mut(&mut self, index: u32) -> &mut Node<V> {
        self.slots[index as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked index {index} points at an empty slot"))
    }

    /// Place `node` at the head of the list. Returns `None` when the arena is full.
    pub fn push_head(&mut self, mut node: Node<V>) -> Option<u32> {
        let index = self.free_list.pop()?;

        node.prev = NIL;
        node.next = self.head;
        self.slots[index as usize] = Some(node);

        if self.head != NIL {
            let head = self.head;
            self.link_mut(head).prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }

        self.len += 1;
        Some(index)
    }

    /// Unlink the node at `index` and reclaim its slot.
    pub fn remove(&mut self, index: u32) -> Option<Node<V>> {
        let node = self.slots.get_mut(index as usize)?.take()?;

        if node.prev != NIL {
            self.link_mut(node.prev).next = node.next;
        } else {
            self.head = node.next;
        }

        if node.next != NIL {
            self.link_mut(node.next).prev = node.prev;
        } else {
            self.tail = node.prev;
        }

        self.free_list.push(index);
        self.len -= 1;
        Some(node)
    }
}
