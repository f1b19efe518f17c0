// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key and value domains.
//!
//! Both are opaque byte strings compared by equality. They carry no
//! accessors beyond `as_bytes`; anything the map needs to know about a key
//! or value it learns by comparing them.

/// A key in a backing store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Box<[u8]>);

/// A value in a backing store.
#[derive(Clone, PartialEq, Eq)]
pub struct Value(Box<[u8]>);

/// Conversions and debug rendering shared by both domains. Debug output
/// shows the bytes as lossy UTF-8, which is what test failures and
/// `KeyNotFound` errors want to display.
macro_rules! bytes_domain {
    ($name:ident) => {
        impl $name {
            /// Returns the underlying bytes.
            #[inline]
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.as_bytes().into())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into_bytes().into())
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.into())
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes.into())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({:?})"),
                    String::from_utf8_lossy(&self.0)
                )
            }
        }
    };
}

bytes_domain!(Key);
bytes_domain!(Value);
