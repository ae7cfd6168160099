//! Append-only in-memory table runs feeding the LSM.
//!
//! A [`TableMemory`] accumulates values during a write batch, tracking
//! whether the appends happen to arrive in key order. Sealing the run with
//! [`TableMemory::make_immutable`] sorts it (if needed) and hands it to the
//! flush path; once the flush completes the run can be recycled with
//! [`TableMemory::make_mutable`].
//!
//! # States
//!
//! ```text
//! Mutable ──make_immutable──► Immutable{flushed: false}
//!    ▲                               │
//!    │                          mark_flushed
//!    │                               ▼
//!    └────make_mutable──── Immutable{flushed: true}
//! ```
//!
//! `key_min`/`key_max` are only valid in the immutable state with at least
//! one value.

use crate::Value;

/// The lifecycle state of a table run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMemoryState {
    /// Accepting appends.
    Mutable,

    /// Sealed and sorted; awaiting or done with its flush.
    Immutable {
        /// True once the LSM has durably flushed this run.
        flushed: bool,

        /// The snapshot below which this run's values are visible.
        snapshot_min: u64,
    },
}

/// Append-only buffer of up to `value_count_max` values with a sorted flag.
#[derive(Debug, Clone)]
pub struct TableMemory<V: Value> {
    values: Vec<V>,
    value_count_max: usize,
    sorted: bool,
    state: TableMemoryState,
}

impl<V: Value> TableMemory<V> {
    /// Creates an empty mutable table run.
    pub fn new(value_count_max: usize) -> Self {
        assert!(value_count_max > 0, "table run must have capacity");
        Self {
            values: Vec::with_capacity(value_count_max),
            value_count_max,
            sorted: true,
            state: TableMemoryState::Mutable,
        }
    }

    /// Appends a value.
    ///
    /// Tracks sortedness incrementally: the run stays sorted while appends
    /// arrive in non-decreasing key order, which the common sequential write
    /// path produces for free.
    ///
    /// # Panics
    ///
    /// Panics if the run is immutable or full.
    pub fn put(&mut self, value: V) {
        assert_eq!(
            self.state,
            TableMemoryState::Mutable,
            "put requires a mutable table run"
        );
        assert!(
            self.values.len() < self.value_count_max,
            "table run full: capacity {}",
            self.value_count_max
        );

        if let Some(last) = self.values.last() {
            self.sorted = self.sorted && last.key() <= value.key();
        }
        self.values.push(value);
    }

    /// Seals the run: sorts it by key if needed and transitions to
    /// `Immutable{flushed: false, snapshot_min}`.
    ///
    /// The sort is stable, so duplicate keys keep their append order and the
    /// flush path resolves them last-writer-wins.
    ///
    /// # Panics
    ///
    /// Panics if the run is already immutable.
    pub fn make_immutable(&mut self, snapshot_min: u64) {
        assert_eq!(
            self.state,
            TableMemoryState::Mutable,
            "make_immutable requires a mutable table run"
        );

        if !self.sorted {
            self.values.sort_by(|a, b| a.key().cmp(&b.key()));
            self.sorted = true;
        }

        self.state = TableMemoryState::Immutable {
            flushed: false,
            snapshot_min,
        };
    }

    /// Records that the LSM has durably flushed this run.
    ///
    /// # Panics
    ///
    /// Panics if the run is mutable or already flushed.
    pub fn mark_flushed(&mut self) {
        match self.state {
            TableMemoryState::Immutable {
                flushed: false,
                snapshot_min,
            } => {
                self.state = TableMemoryState::Immutable {
                    flushed: true,
                    snapshot_min,
                };
            }
            other => panic!("mark_flushed in state {other:?}"),
        }
    }

    /// Recycles a flushed run for the next write batch.
    ///
    /// # Panics
    ///
    /// Panics unless the run is immutable, flushed, and sorted.
    pub fn make_mutable(&mut self) {
        assert!(
            matches!(self.state, TableMemoryState::Immutable { flushed: true, .. }),
            "make_mutable requires a flushed immutable run, state {:?}",
            self.state
        );
        assert!(self.sorted, "immutable run must be sorted");

        self.values.clear();
        self.sorted = true;
        self.state = TableMemoryState::Mutable;
    }

    /// Returns the smallest key in the run.
    ///
    /// # Panics
    ///
    /// Panics unless the run is immutable and non-empty.
    pub fn key_min(&self) -> V::Key {
        assert!(
            matches!(self.state, TableMemoryState::Immutable { .. }),
            "key_min requires an immutable run"
        );
        self.values
            .first()
            .expect("key_min requires a non-empty run")
            .key()
    }

    /// Returns the largest key in the run.
    ///
    /// # Panics
    ///
    /// Panics unless the run is immutable and non-empty.
    pub fn key_max(&self) -> V::Key {
        assert!(
            matches!(self.state, TableMemoryState::Immutable { .. }),
            "key_max requires an immutable run"
        );
        self.values
            .last()
            .expect("key_max requires a non-empty run")
            .key()
    }

    /// Returns the current state.
    pub fn state(&self) -> TableMemoryState {
        self.state
    }

    /// Returns the number of values in the run.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the run holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the values in the run. Sorted by key once immutable.
    pub fn values(&self) -> &[V] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{balance, PostedBalance};

    #[test]
    fn out_of_order_puts_are_sorted_on_seal() {
        let mut table = TableMemory::<PostedBalance>::new(8);
        for account in [1, 3, 5, 0] {
            table.put(balance(account, 100));
        }
        table.make_immutable(0);

        assert_eq!(table.key_min(), 0);
        assert_eq!(table.key_max(), 5);
        assert_eq!(table.count(), 4);
        let keys: Vec<u64> = table.values().iter().map(|v| v.key()).collect();
        assert_eq!(keys, vec![0, 1, 3, 5]);
    }

    #[test]
    fn sequential_puts_skip_the_sort() {
        let mut table = TableMemory::<PostedBalance>::new(8);
        for account in [1, 2, 2, 4] {
            table.put(balance(account, 100));
        }
        assert!(table.sorted);
        table.make_immutable(7);
        assert_eq!(
            table.state(),
            TableMemoryState::Immutable {
                flushed: false,
                snapshot_min: 7
            }
        );
    }

    #[test]
    fn flush_cycle_recycles_the_run() {
        let mut table = TableMemory::<PostedBalance>::new(4);
        table.put(balance(9, 900));
        table.make_immutable(3);
        table.mark_flushed();
        table.make_mutable();

        assert_eq!(table.state(), TableMemoryState::Mutable);
        assert!(table.is_empty());

        // The recycled run accepts a fresh batch.
        table.put(balance(1, 100));
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn duplicate_keys_keep_append_order() {
        let mut table = TableMemory::<PostedBalance>::new(8);
        table.put(balance(2, 1));
        table.put(balance(1, 1));
        table.put(balance(2, 2));
        table.make_immutable(0);

        let units: Vec<u128> = table
            .values()
            .iter()
            .filter(|v| v.key() == 2)
            .map(|v| v.units)
            .collect();
        assert_eq!(units, vec![1, 2]);
    }

    #[test]
    #[should_panic(expected = "put requires a mutable table run")]
    fn put_after_seal_panics() {
        let mut table = TableMemory::<PostedBalance>::new(4);
        table.make_immutable(0);
        table.put(balance(1, 1));
    }

    #[test]
    #[should_panic(expected = "make_mutable requires a flushed immutable run")]
    fn make_mutable_before_flush_panics() {
        let mut table = TableMemory::<PostedBalance>::new(4);
        table.make_immutable(0);
        table.make_mutable();
    }

    use proptest::prelude::*;

    proptest! {
        /// Sealing always yields a non-decreasing key sequence.
        #[test]
        fn prop_sealed_run_is_sorted(
            accounts in proptest::collection::vec(any::<u64>(), 0..64),
        ) {
            let mut table = TableMemory::<PostedBalance>::new(64);
            for account in &accounts {
                table.put(balance(*account, 1));
            }
            table.make_immutable(0);

            let keys: Vec<u64> = table.values().iter().map(|v| v.key()).collect();
            prop_assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
            prop_assert_eq!(keys.len(), accounts.len());
        }
    }
}
