// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction layer: ambient transactions, two-phase commit, and the
//! commit-time gate.
//!
//! This module provides the machinery that makes a map transactional:
//!
//! - Ambient transactions with RAII scopes ([`TxnScope`]) and thread-local
//!   discovery ([`Transaction::current`])
//! - Volatile enlistment of two-phase-commit participants ([`Participant`])
//! - A fair, transaction-scoped gate ([`TxnGate`]) serializing commit-time
//!   mutation of a shared backing store
//! - Per-transaction shadow overlays with undo logs (internal)
//!
//! # Isolation Model
//!
//! Writes made inside a transaction are buffered in a per-transaction
//! overlay and invisible to every other transaction (and to workers outside
//! any transaction) until the owning transaction commits. Within the owning
//! transaction, reads see the overlay first: read-your-own-writes. Between
//! transactions the model is last-writer-wins at commit, serialized by the
//! gate in FIFO order.
//!
//! # Commit Protocol
//!
//! Completing a scope drives the enlisted participants through prepare and
//! commit. Prepare acquires the gate, folds the overlay into the backing
//! store, and records undo information; a prepare failure forces rollback,
//! which replays the undo log and leaves the store exactly as it was. The
//! gate is held from the moment prepare returns until terminal cleanup, so
//! no other transaction observes a half-applied store.
//!
//! # Example
//!
//! ```no_run
//! use shadowmap::{Key, MemoryStore, TxnMap, TxnScope, Value};
//!
//! # fn example() -> Result<(), shadowmap::TxnError> {
//! let map = TxnMap::new(MemoryStore::new());
//!
//! let scope = TxnScope::begin();
//! map.insert(Key::from("balance"), Value::from("100"))?;
//! assert_eq!(map.get(&Key::from("balance"))?, Value::from("100"));
//! scope.complete()?;
//!
//! // Committed state is visible outside any transaction.
//! assert_eq!(map.get(&Key::from("balance"))?, Value::from("100"));
//! # Ok(())
//! # }
//! ```

mod error;
mod gate;
mod shadow;
mod transaction;

pub use error::TxnError;
pub use gate::TxnGate;
pub use transaction::{Transaction, TxnId, TxnScope, TxnState};

pub(crate) use shadow::{ShadowRegistry, TxnShadow};

/// A participant's vote at the end of the prepare phase.
#[derive(Debug)]
pub enum PrepareVote {
    /// The participant applied its changes and can commit.
    Prepared,
    /// The participant failed; the transaction must roll back.
    ForceRollback(TxnError),
}

/// A volatile two-phase-commit participant.
///
/// Enlisted via [`Transaction::enlist_volatile`]. The transaction manager
/// delivers exactly one of `commit`, `rollback`, or `in_doubt`, possibly
/// preceded by `prepare`; returning from a callback acknowledges it.
pub trait Participant: Send + Sync {
    /// First phase. The participant applies its tentative changes and votes.
    fn prepare(&self) -> PrepareVote;

    /// Second phase, or single-phase delivery when no prepare round ran.
    /// Only a single-phase commit can fail.
    fn commit(&self) -> Result<(), TxnError>;

    /// Reverses any changes applied during prepare.
    fn rollback(&self);

    /// The coordinator lost track of the outcome; state is left as-is.
    fn in_doubt(&self);
}
