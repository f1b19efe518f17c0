// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Backing store layer.
//!
//! A backing store is the ordinary, non-transactional mapping whose state a
//! transactional map mutates at commit time. The trait is deliberately
//! minimal: point lookups, point mutations, and full enumeration. Stores are
//! single-thread-safe only; the map facade wraps them in a lock and the
//! transaction layer guarantees that commit-time mutation is serialized.

mod error;
mod kv;
mod memory;

pub use error::StoreError;
pub use kv::{Key, Value};
pub use memory::MemoryStore;

/// The backing store trait.
///
/// Implementations need no internal synchronization and no transaction
/// awareness. A store that reports `is_read_only() == true` cannot back a
/// transactional map; mutating operations on it must fail with
/// [`StoreError::ReadOnly`].
pub trait BackingStore: Send + Sync + 'static {
    /// Returns true if the store contains the key.
    fn contains_key(&self, key: &Key) -> Result<bool, StoreError>;

    /// Reads the value bound to the key, if any.
    fn get(&self, key: &Key) -> Result<Option<Value>, StoreError>;

    /// Binds the key to the value, replacing any existing binding.
    fn set(&mut self, key: Key, value: Value) -> Result<(), StoreError>;

    /// Removes the binding for the key, returning the prior value if any.
    fn remove(&mut self, key: &Key) -> Result<Option<Value>, StoreError>;

    /// Returns a snapshot of every entry. Ordering is unspecified.
    fn entries(&self) -> Result<Vec<(Key, Value)>, StoreError>;

    /// Returns the number of entries.
    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries()?.len())
    }

    /// Returns true if the store has no entries.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Returns true if the store rejects mutation.
    fn is_read_only(&self) -> bool;
}
