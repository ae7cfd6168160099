//! # cinnabar-cache: Hot-path memory layer for `Cinnabar`
//!
//! This crate implements the in-memory object cache of the storage engine's
//! write/prefetch pipeline:
//! - [`Value`]: the contract for cacheable objects (derived key, tombstones)
//! - [`SetAssociativeCache`]: an N-way set-associative cache with an
//!   eviction-sink capability
//! - [`CacheMap`]: the cache backed by two hash-map generations and a scoped
//!   undo log, supporting atomic persist/discard of write batches
//! - [`TableMemory`]: the append-only sorted run buffer feeding the LSM
//! - [`IndexRegistry`]: a runtime registry of typed secondary-index
//!   descriptors
//!
//! Everything here is owned by a single executor; scopes and compactions
//! execute atomically between dispatch points, so no locking is needed.

mod cache_map;
mod index;
mod set_associative;
mod table_memory;
mod value;

pub use cache_map::{CacheMap, CacheMapConfig, ScopeCloseMode};
pub use index::{IndexDescriptor, IndexRegistry, IndexValue, IndexWidth};
pub use set_associative::{
    EvictionSink, NullEvictionSink, SetAssociativeCache, SetAssociativeCacheConfig,
};
pub use table_memory::{TableMemory, TableMemoryState};
pub use value::Value;

/// Test values shared by this crate's unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use crate::Value;

    /// A posted account balance, the smallest object the engine caches.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PostedBalance {
        pub account: u64,
        pub units: u128,
        pub tombstone: bool,
    }

    impl Value for PostedBalance {
        type Key = u64;

        fn key(&self) -> u64 {
            self.account
        }

        fn tombstone_from_key(key: u64) -> Self {
            Self {
                account: key,
                units: 0,
                tombstone: true,
            }
        }

        fn is_tombstone(&self) -> bool {
            self.tombstone
        }
    }

    /// Shorthand for a live balance.
    pub fn balance(account: u64, units: u128) -> PostedBalance {
        PostedBalance {
            account,
            units,
            tombstone: false,
        }
    }
}
