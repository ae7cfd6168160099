//! Runtime registry of secondary-index descriptors.
//!
//! The storage engine maintains one LSM tree per indexed field. Rather than
//! generating a tree type per field at compile time, fields register an
//! [`IndexDescriptor`] here and the engine iterates the registry uniformly,
//! dispatching on the field's integer width. Two widths cover every indexed
//! ledger field: 64-bit (amounts, timestamps) and 128-bit (ids).

use crate::Value;

/// The integer width of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    U64,
    U128,
}

/// An extracted index key, tagged by width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexValue {
    U64(u64),
    U128(u128),
}

impl IndexValue {
    /// Returns the width of this value.
    pub fn width(&self) -> IndexWidth {
        match self {
            IndexValue::U64(_) => IndexWidth::U64,
            IndexValue::U128(_) => IndexWidth::U128,
        }
    }
}

/// Describes one indexed field of a value type.
pub struct IndexDescriptor<V> {
    /// The field name, unique within a registry.
    pub name: &'static str,

    /// The declared width; extraction must agree with it.
    pub width: IndexWidth,

    /// Extracts the field's index key from a value.
    pub extract: fn(&V) -> IndexValue,
}

impl<V> Clone for IndexDescriptor<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for IndexDescriptor<V> {}

impl<V> std::fmt::Debug for IndexDescriptor<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("name", &self.name)
            .field("width", &self.width)
            .finish()
    }
}

/// Registry of the indexed fields of one value type.
#[derive(Debug, Clone)]
pub struct IndexRegistry<V> {
    descriptors: Vec<IndexDescriptor<V>>,
}

impl<V: Value> IndexRegistry<V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Registers an indexed field.
    ///
    /// # Panics
    ///
    /// Panics if a descriptor with the same name is already registered.
    pub fn register(&mut self, descriptor: IndexDescriptor<V>) {
        assert!(
            self.descriptors.iter().all(|d| d.name != descriptor.name),
            "index {:?} registered twice",
            descriptor.name
        );
        self.descriptors.push(descriptor);
    }

    /// Returns the registered descriptors in registration order.
    pub fn descriptors(&self) -> &[IndexDescriptor<V>] {
        &self.descriptors
    }

    /// Extracts every index key of `value`, in registration order.
    ///
    /// # Panics
    ///
    /// Debug builds panic if an extractor disagrees with its declared width.
    pub fn extract_all(&self, value: &V) -> Vec<(&'static str, IndexValue)> {
        self.descriptors
            .iter()
            .map(|descriptor| {
                let extracted = (descriptor.extract)(value);
                debug_assert_eq!(
                    extracted.width(),
                    descriptor.width,
                    "index {:?} extractor width mismatch",
                    descriptor.name
                );
                (descriptor.name, extracted)
            })
            .collect()
    }

    /// Returns the number of registered indexes.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no indexes are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<V: Value> Default for IndexRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{balance, PostedBalance};

    fn ledger_registry() -> IndexRegistry<PostedBalance> {
        let mut registry = IndexRegistry::new();
        registry.register(IndexDescriptor {
            name: "account",
            width: IndexWidth::U64,
            extract: |value: &PostedBalance| IndexValue::U64(value.account),
        });
        registry.register(IndexDescriptor {
            name: "units",
            width: IndexWidth::U128,
            extract: |value: &PostedBalance| IndexValue::U128(value.units),
        });
        registry
    }

    #[test]
    fn extract_all_in_registration_order() {
        let registry = ledger_registry();
        let extracted = registry.extract_all(&balance(42, 1_000));
        assert_eq!(
            extracted,
            vec![
                ("account", IndexValue::U64(42)),
                ("units", IndexValue::U128(1_000)),
            ]
        );
    }

    #[test]
    fn descriptors_iterate_uniformly() {
        let registry = ledger_registry();
        assert_eq!(registry.len(), 2);
        let widths: Vec<IndexWidth> = registry.descriptors().iter().map(|d| d.width).collect();
        assert_eq!(widths, vec![IndexWidth::U64, IndexWidth::U128]);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_name_panics() {
        let mut registry = ledger_registry();
        registry.register(IndexDescriptor {
            name: "account",
            width: IndexWidth::U64,
            extract: |value| IndexValue::U64(value.account),
        });
    }
}
