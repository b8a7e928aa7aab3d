//! Bounded in-memory LRU cache
//!
//! Entries live in a `Vec` arena and are linked into a recency list by slot
//! index; a hash index maps keys to slots. Slots freed by removal or eviction
//! are reused, so the arena never grows past the capacity.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct LruState<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V> LruState<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
        }
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn detach(&mut self, idx: usize) {
        let Some(node) = self.node_mut(idx) else {
            return;
        };
        let (prev, next) = (node.prev.take(), node.next.take());

        match prev {
            Some(p) => {
                if let Some(prev_node) = self.node_mut(p) {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(next_node) = self.node_mut(n) {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(head_node) = self.node_mut(h)
        {
            head_node.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn remove_slot(&mut self, idx: usize) -> Option<(K, V)> {
        self.detach(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn insert(&mut self, key: K, value: V, capacity: usize) {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.node_mut(idx) {
                node.value = value;
            }
            self.move_to_front(idx);
            return;
        }

        if self.index.len() >= capacity
            && let Some(tail) = self.tail
        {
            self.remove_slot(tail);
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }
}

/// Thread-safe, capacity-bounded LRU cache with hit/miss accounting
///
/// `get` promotes the entry it finds, so every operation takes the same
/// exclusive lock.
pub struct BoundedCache<K, V> {
    capacity: NonZeroUsize,
    state: Mutex<LruState<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::new(capacity.get())),
        }
    }

    /// Insert or overwrite, evicting the least recently used entry when full
    pub fn put(&self, key: K, value: V) {
        self.state.lock().insert(key, value, self.capacity.get());
    }

    /// Insert only if the key is not already cached
    ///
    /// The check and the insert happen under one lock, so an entry written
    /// concurrently is never overwritten. An existing entry keeps its value
    /// and recency. Returns whether the value was inserted.
    pub fn put_if_absent(&self, key: K, value: V) -> bool {
        let mut state = self.state.lock();
        if state.index.contains_key(&key) {
            return false;
        }
        state.insert(key, value, self.capacity.get());
        true
    }

    /// Look up a value, promoting it to most recently used on a hit
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        match state.index.get(key).copied() {
            Some(idx) => {
                state.hits += 1;
                state.move_to_front(idx);
                state.node_mut(idx).map(|node| node.value.clone())
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        let idx = state.index.get(key).copied()?;
        state.remove_slot(idx).map(|(_, value)| value)
    }

    /// Membership test that leaves recency and statistics untouched
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().index.contains_key(key)
    }

    /// Drop every entry; hit/miss counters are kept
    pub fn clear(&self) {
        self.state.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn hits(&self) -> u64 {
        self.state.lock().hits
    }

    pub fn misses(&self) -> u64 {
        self.state.lock().misses
    }

    /// hits / (hits + misses), or 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        }
    }

    /// Keys ordered from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        let state = self.state.lock();
        let mut keys = Vec::with_capacity(state.index.len());
        let mut cursor = state.head;
        while let Some(idx) = cursor {
            let Some(node) = state.slots.get(idx).and_then(Option::as_ref) else {
                break;
            };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}
