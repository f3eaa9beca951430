//! Generic recency cache: key → value with least-recently-used eviction.
//!
//! Recency order is a doubly linked list stored in a slot arena (links are slot
//! indices), plus a hash map from key to slot. Promote, insert, remove and
//! evict-from-tail are all O(1).
//!
//! Eviction listeners are always invoked after the cache lock has been
//! released, in eviction order, so a listener may call back into the cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Callback fired once for every value trimmed out of the cache.
pub type EvictionListener<V> = Arc<dyn Fn(&V) + Send + Sync>;

type SlotIdx = usize;

/// One entry in the recency list.
#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

/// Lock-protected cache state: arena, key index and size bounds.
struct RecencyList<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<SlotIdx>,
    index: HashMap<K, SlotIdx>,
    /// Most recently used.
    head: Option<SlotIdx>,
    /// Least recently used.
    tail: Option<SlotIdx>,
    min_size: usize,
    current_size: usize,
    max_size: usize,
}

impl<K: Eq + Hash + Clone, V> RecencyList<K, V> {
    fn new(min_size: usize, current_size: usize, max_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            min_size,
            current_size,
            max_size,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn entry(&self, idx: SlotIdx) -> &Entry<K, V> {
        self.slots[idx].as_ref().expect("recency slot is vacant")
    }

    fn entry_mut(&mut self, idx: SlotIdx) -> &mut Entry<K, V> {
        self.slots[idx].as_mut().expect("recency slot is vacant")
    }

    /// Unlink a slot from the list, leaving it allocated and indexed.
    fn unlink(&mut self, idx: SlotIdx) {
        let (prev, next) = {
            let e = self.entry(idx);
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.entry_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let e = self.entry_mut(idx);
        e.prev = None;
        e.next = None;
    }

    /// Link an unlinked slot at the head (most recently used).
    fn push_head(&mut self, idx: SlotIdx) {
        let old_head = self.head;
        {
            let e = self.entry_mut(idx);
            e.prev = None;
            e.next = old_head;
        }
        match old_head {
            Some(h) => self.entry_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn promote(&mut self, idx: SlotIdx) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_head(idx);
        }
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            let old = std::mem::replace(&mut self.entry_mut(idx).value, value);
            self.promote(idx);
            return Some(old);
        }

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.push_head(idx);
        self.index.insert(key, idx);
        None
    }

    /// Remove a slot entirely: recency order, key index and arena.
    fn remove_slot(&mut self, idx: SlotIdx) -> V {
        self.unlink(idx);
        let entry = self.slots[idx].take().expect("recency slot is vacant");
        self.index.remove(&entry.key);
        self.free.push(idx);
        entry.value
    }

    fn remove_key(&mut self, key: &K) -> Option<V> {
        let idx = *self.index.get(key)?;
        Some(self.remove_slot(idx))
    }

    /// Evict from the tail until at most `to_size` entries remain.
    fn trim_to(&mut self, to_size: usize) -> Vec<V> {
        let mut purged = Vec::new();
        while self.len() > to_size {
            let Some(tail) = self.tail else { break };
            purged.push(self.remove_slot(tail));
        }
        purged
    }

    /// Evict every entry whose value matches, sweeping head to tail.
    fn trim_where<F: FnMut(&V) -> bool>(&mut self, mut pred: F) -> Vec<V> {
        let mut purged = Vec::new();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let (next, matches) = {
                let e = self.entry(idx);
                (e.next, pred(&e.value))
            };
            cursor = next;
            if matches {
                purged.push(self.remove_slot(idx));
            }
        }
        purged
    }

    fn values_in_order(&self) -> impl Iterator<Item = &V> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let e = self.entry(cursor?);
            cursor = e.next;
            Some(&e.value)
        })
    }
}

/// Thread-safe least-recently-used cache with runtime-adjustable capacity.
///
/// Capacity is held as three bounds, `min <= current <= max`. `put` trims to
/// `current - 1` before inserting so the resident count never exceeds `current`.
pub struct RecencyCache<K, V> {
    inner: Mutex<RecencyList<K, V>>,
    listeners: RwLock<Vec<EvictionListener<V>>>,
}

impl<K: Eq + Hash + Clone, V> RecencyCache<K, V> {
    /// Create a cache with the given min, current and max sizes.
    pub fn new(min_size: usize, current_size: usize, max_size: usize) -> Self {
        let max_size = max_size.max(min_size);
        let current_size = current_size.clamp(min_size, max_size);
        Self {
            inner: Mutex::new(RecencyList::new(min_size, current_size, max_size)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener that receives every trimmed value.
    pub fn add_listener(&self, listener: EvictionListener<V>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, purged: Vec<V>) {
        if purged.is_empty() {
            return;
        }
        // Snapshot so listeners may register more listeners without deadlocking.
        let listeners: Vec<EvictionListener<V>> = self.listeners.read().clone();
        for value in &purged {
            for listener in &listeners {
                listener(value);
            }
        }
    }

    /// Insert `value` at the head, first trimming to make room.
    ///
    /// If `key` is already present its value is replaced and promoted; the
    /// replaced value is returned without notifying listeners.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let current = {
            let mut inner = self.inner.lock();
            if inner.index.contains_key(&key) {
                return inner.insert(key, value);
            }
            inner.current_size
        };
        self.trim(current.saturating_sub(1));
        self.inner.lock().insert(key, value)
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        inner.promote(idx);
        Some(inner.entry(idx).value.clone())
    }

    /// Look up `key` without changing recency order.
    pub fn get_without_promotion(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        Some(inner.entry(idx).value.clone())
    }

    /// Remove `key` from the cache and hand its value to the caller.
    ///
    /// Listeners are not notified: the value is being checked out, not evicted.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.inner.lock().remove_key(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().index.contains_key(key)
    }

    /// Evict least recently used entries until at most `to_size` remain.
    ///
    /// Returns the number of entries evicted.
    pub fn trim(&self, to_size: usize) -> usize {
        let purged = self.inner.lock().trim_to(to_size);
        let count = purged.len();
        if count > 0 {
            debug!(count, to_size, "Trimmed recency cache");
        }
        self.notify(purged);
        count
    }

    /// Evict every entry whose value satisfies `pred`, in recency order.
    ///
    /// Returns the number of entries evicted.
    pub fn trim_matching<F: FnMut(&V) -> bool>(&self, pred: F) -> usize {
        let purged = self.inner.lock().trim_where(pred);
        let count = purged.len();
        self.notify(purged);
        count
    }

    /// Evict everything.
    pub fn clear(&self) -> usize {
        self.trim(0)
    }

    /// Values from most to least recently used.
    pub fn snapshot(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.inner.lock().values_in_order().cloned().collect()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity (the `current` bound).
    pub fn capacity(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn min_size(&self) -> usize {
        self.inner.lock().min_size
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Set the lower bound, raising max and current if they fall below it.
    pub fn set_min_size(&self, min: usize) {
        let mut inner = self.inner.lock();
        inner.min_size = min;
        if inner.max_size < min {
            inner.max_size = min;
        }
        inner.current_size = inner.current_size.max(min);
    }

    /// Set the upper bound, lowering min and current if they exceed it.
    pub fn set_max_size(&self, max: usize) {
        let shrink_to = {
            let mut inner = self.inner.lock();
            inner.max_size = max;
            if inner.min_size > max {
                inner.min_size = max;
            }
            if inner.current_size > max {
                inner.current_size = max;
                Some(max)
            } else {
                None
            }
        };
        if let Some(size) = shrink_to {
            self.trim(size);
        }
    }

    /// Set the current capacity; ignored if outside `[min, max]`.
    ///
    /// Returns whether the new size was accepted. Accepting always trims.
    pub fn set_current_size(&self, size: usize) -> bool {
        {
            let mut inner = self.inner.lock();
            if size < inner.min_size || size > inner.max_size {
                return false;
            }
            inner.current_size = size;
        }
        self.trim(size);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording(cache: &RecencyCache<&'static str, u32>) -> Arc<Mutex<Vec<u32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache.add_listener(Arc::new(move |v: &u32| sink.lock().push(*v)));
        seen
    }

    #[test]
    fn test_put_get_promotes() {
        let cache = RecencyCache::new(1, 2, 5);
        let seen = recording(&cache);

        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.snapshot(), vec![2, 1]);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.snapshot(), vec![1, 2]);

        cache.put("c", 3);
        assert_eq!(cache.snapshot(), vec![3, 1]);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_get_without_promotion_keeps_order() {
        let cache = RecencyCache::new(0, 3, 3);
        cache.put(1u32, 10u32);
        cache.put(2, 20);
        assert_eq!(cache.get_without_promotion(&1), Some(10));
        assert_eq!(cache.snapshot(), vec![20, 10]);
        assert_eq!(cache.get_without_promotion(&9), None);
    }

    #[test]
    fn test_pop_removes_without_notifying() {
        let cache = RecencyCache::new(0, 3, 3);
        let seen = recording(&cache);
        cache.put("a", 1);
        cache.put("b", 2);

        assert_eq!(cache.pop(&"a"), Some(1));
        assert_eq!(cache.pop(&"a"), None);
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.snapshot(), vec![2]);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_put_existing_key_replaces() {
        let cache = RecencyCache::new(0, 3, 3);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.put("a", 7), Some(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.snapshot(), vec![7, 2]);
    }

    #[test]
    fn test_trim_edges() {
        let cache: RecencyCache<u32, u32> = RecencyCache::new(0, 4, 4);
        assert_eq!(cache.trim(0), 0);

        for i in 0..4 {
            cache.put(i, i);
        }
        assert_eq!(cache.trim(10), 0);
        assert_eq!(cache.trim(1), 3);
        assert_eq!(cache.snapshot(), vec![3]);
    }

    #[test]
    fn test_trim_matching_sweeps_all() {
        let cache = RecencyCache::new(0, 10, 10);
        let seen = recording(&cache);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            cache.put(k, v);
        }
        let removed = cache.trim_matching(|v| v % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(cache.snapshot(), vec![3, 1]);
        // Head-to-tail sweep order.
        assert_eq!(*seen.lock(), vec![4, 2]);
    }

    #[test]
    fn test_clear_notifies_in_eviction_order() {
        let cache = RecencyCache::new(0, 10, 10);
        let seen = recording(&cache);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_size_bounds() {
        let cache = RecencyCache::new(1, 3, 5);
        for i in 0..3u32 {
            cache.put(i, i);
        }
        assert!(!cache.set_current_size(9));
        assert_eq!(cache.capacity(), 3);

        assert!(cache.set_current_size(1));
        assert_eq!(cache.len(), 1);

        cache.set_min_size(4);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.max_size(), 5);

        cache.set_max_size(2);
        assert_eq!(cache.min_size(), 2);
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn test_listener_can_reenter() {
        let cache: Arc<RecencyCache<u32, u32>> = Arc::new(RecencyCache::new(0, 1, 4));
        let calls = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&cache);
        let counter = calls.clone();
        cache.add_listener(Arc::new(move |_v: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(cache) = weak.upgrade() {
                // Unrelated key; must not deadlock.
                let _ = cache.get_without_promotion(&999);
                let _ = cache.len();
            }
        }));
        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.snapshot(), vec![3]);
    }

    #[test]
    fn test_slots_are_reused() {
        let cache = RecencyCache::new(0, 2, 2);
        for i in 0..100u32 {
            cache.put(i, i);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.inner.lock().slots.len() <= 3);
    }
}
