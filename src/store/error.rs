// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Backing store error types.

/// Errors that can occur in backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is read-only")]
    ReadOnly,

    #[error("backend error: {0}")]
    Backend(String),
}
