//! The contract for cacheable objects.

use std::fmt::Debug;
use std::hash::Hash;

/// A value that can live in the cache, the stash, or a table run.
///
/// The key is derived from the value by a pure function, never stored
/// separately. Deletes are represented by a distinguished tombstone value
/// that carries the key but no payload.
pub trait Value: Clone {
    /// The derived key type.
    type Key: Copy + Eq + Ord + Hash + Debug;

    /// Derives this value's key.
    fn key(&self) -> Self::Key;

    /// Constructs the tombstone for a key.
    fn tombstone_from_key(key: Self::Key) -> Self;

    /// Returns true if this value is a tombstone.
    fn is_tombstone(&self) -> bool;
}
