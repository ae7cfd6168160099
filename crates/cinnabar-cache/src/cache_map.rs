//! Two-tier object cache with transactional scopes.
//!
//! A [`CacheMap`] layers a [`SetAssociativeCache`] over two hash-map
//! generations (the "stash"). Values displaced from the cache land in the
//! newer generation, so prefetched data survives until the next compaction;
//! [`CacheMap::compact`] drops the older generation and demotes the newer
//! one between write batches.
//!
//! A scope makes a group of mutations atomic: every value the scope touches
//! is captured once in an undo log, and closing the scope with
//! [`ScopeCloseMode::Discard`] replays the log to restore the pre-scope
//! state. Closing with [`ScopeCloseMode::Persist`] simply drops the log.
//!
//! # Invariants
//!
//! - A key appears at most once in the cache and at most once per stash
//!   generation. Lookup precedence is cache, then generation 1, then
//!   generation 2; a stale value in a lower level is permitted only while
//!   the correct value exists above it.
//! - At most one scope is open at a time; opening and closing out of order
//!   is a programming error and asserts.
//! - The undo log captures the *oldest* version of each key touched inside
//!   the scope, so repeated writes to one key still revert to the pre-scope
//!   value.

use std::collections::HashMap;
use std::mem;

use crate::set_associative::{EvictionSink, SetAssociativeCache, SetAssociativeCacheConfig};
use crate::Value;

/// Configuration for a [`CacheMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMapConfig {
    /// Total slot count of the set-associative cache.
    pub cache_value_count_max: usize,

    /// Associativity of the cache.
    pub cache_ways: usize,

    /// Upper bound on values a single scope may capture.
    pub scope_value_count_max: usize,
}

impl CacheMapConfig {
    /// Configuration for testing (small limits).
    pub fn testing() -> Self {
        Self {
            cache_value_count_max: 32,
            cache_ways: 4,
            scope_value_count_max: 32,
        }
    }
}

/// How to end a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeCloseMode {
    /// Keep every mutation made inside the scope.
    Persist,

    /// Revert every mutation made inside the scope.
    Discard,
}

/// The scope undo log: the oldest captured version of each key touched
/// while a scope was open. A tombstone entry means "the key did not exist
/// before the scope".
#[derive(Debug, Clone)]
struct ScopeLog<V: Value> {
    entries: HashMap<V::Key, V>,
    capacity: usize,
    open: bool,
}

impl<V: Value> ScopeLog<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            open: false,
        }
    }

    /// Captures a pre-scope version, first write per key wins.
    fn record(&mut self, prior: V) {
        let key = prior.key();
        if !self.entries.contains_key(&key) {
            assert!(
                self.entries.len() < self.capacity,
                "scope undo log overflow: capacity {}",
                self.capacity
            );
            self.entries.insert(key, prior);
        }
    }
}

/// Routes cache evictions into the stash and the open scope's undo log.
///
/// Borrowing only the stash fields keeps the cache free for the mutation in
/// progress; the sink never re-enters the cache.
struct StashSink<'a, V: Value> {
    map_1: &'a mut HashMap<V::Key, V>,
    scope: &'a mut ScopeLog<V>,
}

impl<V: Value> EvictionSink<V> for StashSink<'_, V> {
    fn on_evict(&mut self, evicted: V, updated: bool) {
        if updated {
            // The evicted value is the old version of the key being written:
            // it only matters as undo state.
            if self.scope.open {
                self.scope.record(evicted);
            }
        } else {
            // A different key was displaced to make room. It moves to the
            // newer stash generation, and the scope must reinsert it on
            // discard.
            if self.scope.open {
                self.scope.record(evicted.clone());
            }
            self.map_1.insert(evicted.key(), evicted);
        }
    }
}

/// Set-associative cache + two-generation stash + scoped undo log.
#[derive(Debug, Clone)]
pub struct CacheMap<V: Value> {
    cache: SetAssociativeCache<V>,

    /// Newer stash generation: catches values displaced from the cache.
    map_1: HashMap<V::Key, V>,

    /// Older stash generation: dropped by the next compaction.
    map_2: HashMap<V::Key, V>,

    scope: ScopeLog<V>,
}

impl<V: Value> CacheMap<V> {
    /// Creates an empty cache map.
    pub fn new(config: CacheMapConfig) -> Self {
        Self {
            cache: SetAssociativeCache::new(SetAssociativeCacheConfig {
                value_count_max: config.cache_value_count_max,
                ways: config.cache_ways,
            }),
            map_1: HashMap::new(),
            map_2: HashMap::new(),
            scope: ScopeLog::new(config.scope_value_count_max),
        }
    }

    /// Returns the value for `key`.
    ///
    /// Lookup precedence: cache, then generation 1, then generation 2.
    /// Tombstones are returned like any other value; callers that care check
    /// [`Value::is_tombstone`].
    pub fn get(&self, key: &V::Key) -> Option<&V> {
        self.cache
            .get(key)
            .or_else(|| self.map_1.get(key))
            .or_else(|| self.map_2.get(key))
    }

    /// Returns true if `key` is present at any level, tombstones included.
    pub fn has(&self, key: &V::Key) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or updates `value` under its derived key.
    pub fn upsert(&mut self, value: V) {
        let key = value.key();
        let mut sink = StashSink {
            map_1: &mut self.map_1,
            scope: &mut self.scope,
        };
        let updated = self.cache.upsert(value, &mut sink);

        // The key was not resident, so the cache held no prior version of
        // it (displacing a different key does not count). The pre-scope
        // version is whatever the stash holds; if the stash has nothing
        // either, undo means removal.
        if !updated && self.scope.open {
            let prior = self
                .map_1
                .get(&key)
                .or_else(|| self.map_2.get(&key))
                .cloned();
            match prior {
                Some(stashed) => self.scope.record(stashed),
                None => self.scope.record(V::tombstone_from_key(key)),
            }
        }
    }

    /// Deletes `key` from the cache and from both stash generations.
    pub fn remove(&mut self, key: V::Key) {
        let evicted = self.cache.remove(&key);

        if self.scope.open {
            let prior = evicted
                .clone()
                .or_else(|| self.map_1.get(&key).cloned())
                .or_else(|| self.map_2.get(&key).cloned());
            if let Some(prior) = prior {
                self.scope.record(prior);
            }
        }

        self.map_1.remove(&key);
        self.map_2.remove(&key);
    }

    /// Begins a scope.
    ///
    /// # Panics
    ///
    /// Panics if a scope is already open or the undo log is not empty.
    pub fn scope_open(&mut self) {
        assert!(!self.scope.open, "a scope is already open");
        assert!(
            self.scope.entries.is_empty(),
            "scope undo log must be empty when opening"
        );
        self.scope.open = true;
    }

    /// Ends the open scope.
    ///
    /// `Persist` drops the undo log, keeping every mutation. `Discard`
    /// replays the undo log: tombstone entries are removed from the cache
    /// and generation 1 (never generation 2), value entries are upserted
    /// back.
    ///
    /// # Panics
    ///
    /// Panics if no scope is open.
    pub fn scope_close(&mut self, mode: ScopeCloseMode) {
        assert!(self.scope.open, "no scope is open");
        self.scope.open = false;

        match mode {
            ScopeCloseMode::Persist => {
                tracing::trace!(captured = self.scope.entries.len(), "scope persisted");
                self.scope.entries.clear();
            }
            ScopeCloseMode::Discard => {
                let entries = mem::take(&mut self.scope.entries);
                tracing::trace!(captured = entries.len(), "scope discarded");
                for (key, prior) in entries {
                    if prior.is_tombstone() {
                        let _ = self.cache.remove(&key);
                        self.map_1.remove(&key);
                    } else {
                        let mut sink = StashSink {
                            map_1: &mut self.map_1,
                            scope: &mut self.scope,
                        };
                        self.cache.upsert(prior, &mut sink);
                    }
                }
            }
        }
    }

    /// Drops the older stash generation and demotes the newer one.
    ///
    /// This is the cache-invalidation step run between write batches.
    ///
    /// # Panics
    ///
    /// Panics if a scope is open.
    pub fn compact(&mut self) {
        assert!(!self.scope.open, "compact requires no open scope");
        assert!(
            self.scope.entries.is_empty(),
            "compact requires an empty scope undo log"
        );
        self.map_2.clear();
        mem::swap(&mut self.map_1, &mut self.map_2);
    }

    /// Returns the number of values resident in the cache tier.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Returns the sizes of the two stash generations.
    pub fn stash_lens(&self) -> (usize, usize) {
        (self.map_1.len(), self.map_2.len())
    }
}
