// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction error types.

use crate::store::{Key, StoreError};

/// Errors that can occur in transactional map operations.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("no ambient transaction")]
    NoTransaction,

    #[error("backing store is read-only")]
    ReadOnlyStore,

    #[error("key not found: {key:?}")]
    KeyNotFound { key: Key },

    #[error("transaction already committed")]
    AlreadyCommitted,

    #[error("transaction already aborted")]
    AlreadyAborted,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
