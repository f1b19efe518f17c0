// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory backing store implementation.

use std::collections::HashMap;

use super::{BackingStore, Key, StoreError, Value};

/// In-memory backing store over a plain `HashMap`.
///
/// The stock store for transactional maps that do not need persistence.
/// Like every [`BackingStore`], it is single-thread-safe only; the map
/// facade serializes access to it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: HashMap<Key, Value>,
    read_only: bool,
}

impl MemoryStore {
    /// Creates an empty, writable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writable store pre-populated with the given entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Self {
            map: entries.into_iter().collect(),
            read_only: false,
        }
    }

    /// Creates a read-only store over the given entries.
    ///
    /// Mutating operations return [`StoreError::ReadOnly`].
    pub fn frozen(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Self {
            map: entries.into_iter().collect(),
            read_only: true,
        }
    }
}

impl BackingStore for MemoryStore {
    fn contains_key(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.map.contains_key(key))
    }

    fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: Key, value: Value) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.map.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &Key) -> Result<Option<Value>, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(self.map.remove(key))
    }

    fn entries(&self) -> Result<Vec<(Key, Value)>, StoreError> {
        Ok(self
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.map.len())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
