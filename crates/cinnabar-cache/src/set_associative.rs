//! N-way set-associative cache with an eviction-sink capability.
//!
//! The cache is a flat slot array partitioned into sets of `ways` slots.
//! A key hashes to exactly one set; within the set, lookups scan the ways
//! linearly. Capacity evictions pick the victim with a per-set clock hand.
//!
//! Evictions are delivered to an [`EvictionSink`] supplied by the caller
//! rather than through a stored callback, so the owner decides what happens
//! to displaced values without the cache ever being re-entered mid-mutation.

use std::hash::{Hash, Hasher};

use crate::Value;

/// Receives values evicted from the cache during an upsert.
///
/// `updated` distinguishes the two eviction causes:
/// - `true`: the evicted value is the old version of the same key (update)
/// - `false`: the evicted value belongs to a different key displaced to make
///   room (capacity eviction)
///
/// Implementations must not mutate the cache that invoked them; defer any
/// follow-up cache work until the upsert returns.
pub trait EvictionSink<V: Value> {
    fn on_evict(&mut self, evicted: V, updated: bool);
}

/// A sink that drops evicted values.
pub struct NullEvictionSink;

impl<V: Value> EvictionSink<V> for NullEvictionSink {
    fn on_evict(&mut self, _evicted: V, _updated: bool) {}
}

/// Configuration for a [`SetAssociativeCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetAssociativeCacheConfig {
    /// Total number of slots. Must be a multiple of `ways`.
    pub value_count_max: usize,

    /// Associativity: slots per set.
    pub ways: usize,
}

impl SetAssociativeCacheConfig {
    /// Configuration for testing (small limits).
    pub fn testing() -> Self {
        Self {
            value_count_max: 64,
            ways: 4,
        }
    }
}

/// N-way set-associative cache.
///
/// # Invariants
///
/// - Capacity and associativity are fixed at construction
/// - A key occupies at most one slot
/// - A full set always has a victim: the clock hand advances on every
///   capacity eviction, so no way is starved
#[derive(Debug, Clone)]
pub struct SetAssociativeCache<V: Value> {
    slots: Box<[Option<V>]>,

    /// Next victim way per set, advanced on each capacity eviction.
    clock_hands: Box<[u8]>,

    ways: usize,
    set_count: usize,
    len: usize,
}

impl<V: Value> SetAssociativeCache<V> {
    /// Creates an empty cache.
    ///
    /// # Panics
    ///
    /// Panics if `value_count_max` is zero, not a multiple of `ways`, or the
    /// associativity exceeds 255 (the clock hand is a byte).
    pub fn new(config: SetAssociativeCacheConfig) -> Self {
        assert!(config.value_count_max > 0, "cache must have capacity");
        assert!(config.ways > 0 && config.ways <= 255, "ways must be in 1..=255");
        assert_eq!(
            config.value_count_max % config.ways,
            0,
            "value_count_max {} must be a multiple of ways {}",
            config.value_count_max,
            config.ways
        );

        let set_count = config.value_count_max / config.ways;
        Self {
            slots: vec![None; config.value_count_max].into_boxed_slice(),
            clock_hands: vec![0u8; set_count].into_boxed_slice(),
            ways: config.ways,
            set_count,
            len: 0,
        }
    }

    /// Returns the value for `key`, if cached.
    pub fn get(&self, key: &V::Key) -> Option<&V> {
        let base = self.set_base(key);
        self.slots[base..base + self.ways]
            .iter()
            .flatten()
            .find(|value| value.key() == *key)
    }

    /// Inserts or updates `value`, delivering any eviction to `sink`.
    ///
    /// Returns true if the key was already resident and its old version was
    /// evicted to the sink with `updated = true`. Returns false if the value
    /// was newly inserted; a full set then displaces a *different* key to
    /// the sink with `updated = false`.
    pub fn upsert(&mut self, value: V, sink: &mut dyn EvictionSink<V>) -> bool {
        let key = value.key();
        let base = self.set_base(&key);

        // Update in place if the key is already resident.
        for slot in &mut self.slots[base..base + self.ways] {
            if slot.as_ref().is_some_and(|existing| existing.key() == key) {
                let old = slot.replace(value).expect("slot was occupied");
                sink.on_evict(old, true);
                return true;
            }
        }

        // Take a free way if one exists.
        for slot in &mut self.slots[base..base + self.ways] {
            if slot.is_none() {
                *slot = Some(value);
                self.len += 1;
                return false;
            }
        }

        // The set is full: displace the way under the clock hand.
        let set = base / self.ways;
        let hand = usize::from(self.clock_hands[set]);
        self.clock_hands[set] = ((hand + 1) % self.ways) as u8;

        let old = self.slots[base + hand]
            .replace(value)
            .expect("a full set has no empty ways");
        sink.on_evict(old, false);
        false
    }

    /// Removes and returns the value for `key`, if cached.
    pub fn remove(&mut self, key: &V::Key) -> Option<V> {
        let base = self.set_base(key);
        for slot in &mut self.slots[base..base + self.ways] {
            if slot.as_ref().is_some_and(|existing| existing.key() == *key) {
                self.len -= 1;
                return slot.take();
            }
        }
        None
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slots are occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the total slot capacity.
    pub fn value_count_max(&self) -> usize {
        self.slots.len()
    }

    fn set_base(&self, key: &V::Key) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize % self.set_count) * self.ways
    }
}
