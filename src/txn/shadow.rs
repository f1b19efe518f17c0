// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction shadow overlays.
//!
//! A shadow presents a writable view over the shared backing store for one
//! transaction. Writes land in an overlay private to the transaction; reads
//! consult the overlay first and fall through to the store. At prepare time
//! the shadow acquires the gate, folds the overlay into the store, and
//! records undo information so a later rollback can reverse the fold exactly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::store::{BackingStore, Key, Value};

use super::error::TxnError;
use super::gate::TxnGate;
use super::transaction::{Transaction, TxnId};
use super::{Participant, PrepareVote};

/// Tentative state recorded for a key touched inside a transaction.
///
/// Absence of an entry means "defer to the backing store".
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OverlayEntry {
    Set(Value),
    Tombstone,
}

/// The facade's transaction-to-shadow registry.
pub(crate) type ShadowRegistry<S> = Arc<Mutex<HashMap<TxnId, Arc<TxnShadow<S>>>>>;

struct ShadowState {
    overlay: HashMap<Key, OverlayEntry>,
    /// (key, prior value) pairs, appended as the overlay is folded into the
    /// store. `None` records that the key was absent.
    undo: Vec<(Key, Option<Value>)>,
    prepared: bool,
    gate_held: bool,
    finished: bool,
}

/// A per-transaction overlay and two-phase-commit participant.
///
/// One shadow exists per (map, transaction) pair. The shadow enlists itself
/// with its transaction at construction and cleans up (gate release, then
/// registry removal) exactly once, whichever callback terminates it.
pub(crate) struct TxnShadow<S: BackingStore> {
    txn: Transaction,
    store: Arc<RwLock<S>>,
    gate: Arc<TxnGate>,
    registry: ShadowRegistry<S>,
    state: Mutex<ShadowState>,
}

impl<S: BackingStore> TxnShadow<S> {
    /// Creates a shadow for the ambient transaction and enlists it.
    ///
    /// Fails with [`TxnError::NoTransaction`] outside a transaction and with
    /// [`TxnError::ReadOnlyStore`] when the store rejects mutation.
    pub(crate) fn new(
        store: Arc<RwLock<S>>,
        gate: Arc<TxnGate>,
        registry: ShadowRegistry<S>,
    ) -> Result<Arc<Self>, TxnError> {
        let txn = Transaction::current().ok_or(TxnError::NoTransaction)?;
        if store.read().is_read_only() {
            return Err(TxnError::ReadOnlyStore);
        }

        let shadow = Arc::new(Self {
            txn: txn.clone(),
            store,
            gate,
            registry,
            state: Mutex::new(ShadowState {
                overlay: HashMap::new(),
                undo: Vec::new(),
                prepared: false,
                gate_held: false,
                finished: false,
            }),
        });

        txn.enlist_volatile(Arc::clone(&shadow) as Arc<dyn Participant>)?;
        let weak = Arc::downgrade(&shadow);
        txn.on_completed(move |txn| {
            if let Some(shadow) = weak.upgrade() {
                shadow.txn_completed(txn.id());
            }
        });
        Ok(shadow)
    }

    /// The transaction this shadow was enlisted for.
    pub(crate) fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    // Read path: overlay first, then the store.

    pub(crate) fn get(&self, key: &Key) -> Result<Option<Value>, TxnError> {
        let state = self.state.lock();
        match state.overlay.get(key) {
            Some(OverlayEntry::Set(value)) => Ok(Some(value.clone())),
            Some(OverlayEntry::Tombstone) => Ok(None),
            None => Ok(self.store.read().get(key)?),
        }
    }

    pub(crate) fn contains_key(&self, key: &Key) -> Result<bool, TxnError> {
        Ok(self.get(key)?.is_some())
    }

    pub(crate) fn contains_pair(&self, key: &Key, value: &Value) -> Result<bool, TxnError> {
        Ok(self.get(key)?.as_ref() == Some(value))
    }

    // Write path: every mutation is buffered in the overlay.

    pub(crate) fn insert(&self, key: Key, value: Value) {
        self.state.lock().overlay.insert(key, OverlayEntry::Set(value));
    }

    /// Records a tombstone and reports whether the key was effectively
    /// present beforehand.
    pub(crate) fn remove(&self, key: &Key) -> Result<bool, TxnError> {
        let mut state = self.state.lock();
        let present = match state.overlay.get(key) {
            Some(OverlayEntry::Set(_)) => true,
            Some(OverlayEntry::Tombstone) => false,
            None => self.store.read().contains_key(key)?,
        };
        state.overlay.insert(key.clone(), OverlayEntry::Tombstone);
        Ok(present)
    }

    /// Records a tombstone and reports whether the effective value equalled
    /// the supplied one. The tombstone is written even on a mismatch.
    pub(crate) fn remove_pair(&self, key: &Key, value: &Value) -> Result<bool, TxnError> {
        let mut state = self.state.lock();
        let matched = match state.overlay.get(key) {
            Some(OverlayEntry::Set(current)) => current == value,
            Some(OverlayEntry::Tombstone) => false,
            None => self.store.read().get(key)?.as_ref() == Some(value),
        };
        state.overlay.insert(key.clone(), OverlayEntry::Tombstone);
        Ok(matched)
    }

    /// Tombstones every key in the materialized view.
    pub(crate) fn clear(&self) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        let view = self.materialized(&state)?;
        for key in view.into_keys() {
            state.overlay.insert(key, OverlayEntry::Tombstone);
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> Result<usize, TxnError> {
        let state = self.state.lock();
        Ok(self.materialized(&state)?.len())
    }

    pub(crate) fn entries(&self) -> Result<Vec<(Key, Value)>, TxnError> {
        let state = self.state.lock();
        Ok(self.materialized(&state)?.into_iter().collect())
    }

    /// Copies the store and folds the overlay into the copy.
    fn materialized(&self, state: &ShadowState) -> Result<HashMap<Key, Value>, TxnError> {
        let mut view: HashMap<Key, Value> = self.store.read().entries()?.into_iter().collect();
        for (key, entry) in &state.overlay {
            match entry {
                OverlayEntry::Set(value) => {
                    view.insert(key.clone(), value.clone());
                }
                OverlayEntry::Tombstone => {
                    view.remove(key);
                }
            }
        }
        Ok(view)
    }

    // Two-phase-commit internals.

    /// Acquires the gate for this transaction.
    fn lock_store(&self) {
        self.gate.lock(self.txn.id());
        self.state.lock().gate_held = true;
    }

    /// The prepare body: gate, then fold the overlay into the store.
    ///
    /// Each undo record is appended only after the corresponding forward
    /// mutation succeeded, so the undo log always matches what was applied.
    fn do_prepare(&self) -> Result<(), TxnError> {
        self.lock_store();

        let mut state = self.state.lock();
        let mut store = self.store.write();
        let ShadowState {
            overlay,
            undo,
            prepared,
            ..
        } = &mut *state;

        for (key, entry) in overlay.iter() {
            let prior = store.get(key)?;
            match entry {
                OverlayEntry::Set(value) => store.set(key.clone(), value.clone())?,
                OverlayEntry::Tombstone => {
                    store.remove(key)?;
                }
            }
            undo.push((key.clone(), prior));
        }
        *prepared = true;
        Ok(())
    }

    /// Replays the undo log, restoring the store to its pre-prepare state.
    fn revert(&self) {
        let mut state = self.state.lock();
        let undo = std::mem::take(&mut state.undo);
        if undo.is_empty() {
            return;
        }
        let mut store = self.store.write();
        for (key, prior) in undo {
            let result = match prior {
                Some(value) => store.set(key.clone(), value),
                None => store.remove(&key).map(|_| ()),
            };
            if let Err(err) = result {
                error!(?key, error = %err, "undo restore failed");
            }
        }
    }

    /// Terminal cleanup: release the gate, then drop the registry entry.
    ///
    /// Runs at most once. The gate must be released first so the next
    /// transaction's first map touch does not queue on the registry mutex
    /// behind a still-held gate.
    fn finish(&self) {
        let held = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            std::mem::replace(&mut state.gate_held, false)
        };
        if held {
            self.gate.unlock();
        }
        self.registry.lock().remove(&self.txn.id());
    }

    /// Completion-event handler: unblocks a queued gate wait and makes sure
    /// cleanup ran even when no terminal callback was delivered.
    fn txn_completed(&self, txn: TxnId) {
        self.gate.cancel(txn);
        self.finish();
    }

    #[cfg(test)]
    fn is_prepared(&self) -> bool {
        self.state.lock().prepared
    }
}

impl<S: BackingStore> Participant for TxnShadow<S> {
    fn prepare(&self) -> PrepareVote {
        match self.do_prepare() {
            Ok(()) => PrepareVote::Prepared,
            Err(err) => {
                debug!(txn = self.txn.id().0, error = %err, "prepare failed");
                PrepareVote::ForceRollback(err)
            }
        }
    }

    fn commit(&self) -> Result<(), TxnError> {
        let prepared = self.state.lock().prepared;
        if !prepared {
            // Single-phase delivery: no prepare round preceded this call.
            if let Err(err) = self.do_prepare() {
                self.revert();
                self.finish();
                return Err(err);
            }
        }
        self.finish();
        Ok(())
    }

    fn rollback(&self) {
        self.revert();
        self.finish();
    }

    fn in_doubt(&self) {
        // The store keeps whatever the most recent callback left behind;
        // cleanup happens in the completion handler.
        debug!(txn = self.txn.id().0, "transaction outcome in doubt");
    }
}
