// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! ShadowMap: a transaction-aware key-value map with two-phase-commit enlistment
//!
//! This crate provides a mapping whose writes participate in an ambient
//! transaction: changes made inside a transaction are buffered in a
//! per-transaction shadow overlay, invisible to other transactions until
//! commit, and gone without a trace on rollback. Commit-time mutation of the
//! shared backing store is serialized by a fair, transaction-scoped gate.

pub mod map;
pub mod store;
pub mod txn;

pub use map::TxnMap;
pub use store::{BackingStore, Key, MemoryStore, StoreError, Value};
pub use txn::{
    Participant, PrepareVote, Transaction, TxnError, TxnGate, TxnId, TxnScope, TxnState,
};
