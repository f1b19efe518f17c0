// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The transactional map facade.
//!
//! [`TxnMap`] presents an ordinary mutable-mapping surface and reroutes every
//! operation through the shadow of the ambient transaction. Outside any
//! transaction, operations go straight to the backing store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::store::{BackingStore, Key, Value};
use crate::txn::{ShadowRegistry, Transaction, TxnError, TxnGate, TxnShadow};

/// A transaction-aware map over a backing store.
///
/// Safe for concurrent use by threads in *different* transactions (or in
/// none). Two workers sharing one transaction race exactly as they would on
/// a plain mapping.
///
/// The map keeps one shadow per active transaction that has touched it,
/// created lazily on first touch and dropped when the transaction
/// terminates. Commit-time mutation of the backing store is serialized by a
/// per-map [`TxnGate`].
pub struct TxnMap<S: BackingStore> {
    store: Arc<RwLock<S>>,
    gate: Arc<TxnGate>,
    shadows: ShadowRegistry<S>,
}

impl<S: BackingStore> TxnMap<S> {
    /// Creates a transactional map over the given backing store.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            gate: Arc::new(TxnGate::new()),
            shadows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Looks up or lazily creates the shadow for the given transaction.
    ///
    /// The registry mutex covers lookup and creation only; it is released
    /// before the caller operates on the shadow and is never held across a
    /// gate acquisition.
    fn shadow_for(&self, txn: &Transaction) -> Result<Arc<TxnShadow<S>>, TxnError> {
        let mut shadows = self.shadows.lock();
        if let Some(shadow) = shadows.get(&txn.id()) {
            return Ok(Arc::clone(shadow));
        }
        let shadow = TxnShadow::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gate),
            Arc::clone(&self.shadows),
        )?;
        shadows.insert(shadow.txn_id(), Arc::clone(&shadow));
        Ok(shadow)
    }

    /// Looks up a key, failing if it is absent.
    pub fn get(&self, key: &Key) -> Result<Value, TxnError> {
        self.try_get(key)?
            .ok_or_else(|| TxnError::KeyNotFound { key: key.clone() })
    }

    /// Looks up a key, returning `None` if it is absent.
    pub fn try_get(&self, key: &Key) -> Result<Option<Value>, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.read().get(key)?),
            Some(txn) => self.shadow_for(&txn)?.get(key),
        }
    }

    /// Returns true if the key is present in the current view.
    pub fn contains_key(&self, key: &Key) -> Result<bool, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.read().contains_key(key)?),
            Some(txn) => self.shadow_for(&txn)?.contains_key(key),
        }
    }

    /// Returns true if the key is bound to exactly this value.
    pub fn contains_pair(&self, key: &Key, value: &Value) -> Result<bool, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.read().get(key)?.as_ref() == Some(value)),
            Some(txn) => self.shadow_for(&txn)?.contains_pair(key, value),
        }
    }

    /// Binds the key to the value, replacing any existing binding.
    pub fn insert(&self, key: Key, value: Value) -> Result<(), TxnError> {
        match Transaction::current() {
            None => Ok(self.store.write().set(key, value)?),
            Some(txn) => {
                self.shadow_for(&txn)?.insert(key, value);
                Ok(())
            }
        }
    }

    /// Removes the key, returning true if it was present.
    pub fn remove(&self, key: &Key) -> Result<bool, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.write().remove(key)?.is_some()),
            Some(txn) => self.shadow_for(&txn)?.remove(key),
        }
    }

    /// Removes the pair, returning true if the key was bound to exactly this
    /// value.
    ///
    /// Inside a transaction the key is tombstoned even when the value does
    /// not match, so a mismatched `remove_pair` still removes the key at
    /// commit.
    pub fn remove_pair(&self, key: &Key, value: &Value) -> Result<bool, TxnError> {
        match Transaction::current() {
            None => {
                let mut store = self.store.write();
                if store.get(key)?.as_ref() == Some(value) {
                    store.remove(key)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Some(txn) => self.shadow_for(&txn)?.remove_pair(key, value),
        }
    }

    /// Removes every key visible in the current view.
    pub fn clear(&self) -> Result<(), TxnError> {
        match Transaction::current() {
            None => {
                let mut store = self.store.write();
                for (key, _) in store.entries()? {
                    store.remove(&key)?;
                }
                Ok(())
            }
            Some(txn) => self.shadow_for(&txn)?.clear(),
        }
    }

    /// Returns the number of entries in the current view.
    pub fn len(&self) -> Result<usize, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.read().len()?),
            Some(txn) => self.shadow_for(&txn)?.len(),
        }
    }

    /// Returns true if the current view has no entries.
    pub fn is_empty(&self) -> Result<bool, TxnError> {
        Ok(self.len()? == 0)
    }

    /// Returns a snapshot of the entries in the current view.
    /// Ordering is unspecified.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>, TxnError> {
        match Transaction::current() {
            None => Ok(self.store.read().entries()?),
            Some(txn) => self.shadow_for(&txn)?.entries(),
        }
    }

    /// Returns a snapshot of the keys in the current view.
    pub fn keys(&self) -> Result<Vec<Key>, TxnError> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Returns a snapshot of the values in the current view.
    pub fn values(&self) -> Result<Vec<Value>, TxnError> {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Appends a snapshot of the current view to the buffer.
    pub fn copy_into(&self, buf: &mut Vec<(Key, Value)>) -> Result<(), TxnError> {
        buf.extend(self.entries()?);
        Ok(())
    }

    /// The transactional view is always writable.
    pub fn is_read_only(&self) -> bool {
        false
    }
}
