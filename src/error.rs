//! # Storage Error Taxonomy
//!
//! All fallible StrataDB APIs return `eyre::Result`. The variants below are
//! the stable classification layer underneath those reports: every error the
//! storage core raises itself is a `StorageError`, wrapped into an `eyre`
//! report (possibly with additional context frames). Callers that need to
//! branch on the failure class recover it with
//! `report.downcast_ref::<StorageError>()`.
//!
//! ## Classification
//!
//! | Variant              | Meaning                                         |
//! |----------------------|-------------------------------------------------|
//! | `Io`                 | Underlying read/write failure                   |
//! | `CorruptPage`        | Bitset, length, checksum, or tag inconsistent   |
//! | `RecordDecode`       | Record serializer rejected the bytes            |
//! | `DanglingReference`  | Overflow reference to an unreachable page       |
//! | `UnsupportedKey`     | Key outside the maximum addressable trie range  |
//! | `TransactionClosed`  | Operation after `close`                         |
//! | `IllegalState`       | Invariant violation; never recovered            |
//!
//! Deletion markers are not errors: a tombstoned record reads as `None`.
//!
//! ## Propagation Rules
//!
//! Page load errors surface verbatim to the caller. A failed cache load
//! leaves no cache entry behind (the cache is never poisoned). `close` is
//! infallible after the first successful close.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying read or write failure.
    #[error("storage I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// On-disk page material is internally inconsistent.
    #[error("corrupt page: {reason}")]
    CorruptPage { reason: String },

    /// The record persister rejected the bytes handed to it.
    #[error("record decode failed for node key {node_key}: {reason}")]
    RecordDecode { node_key: u64, reason: String },

    /// An overflow reference points at a page that cannot be reached.
    #[error("dangling overflow reference for node key {node_key}")]
    DanglingReference { node_key: u64 },

    /// The key cannot be addressed by the indirect trie.
    #[error("key {key} is outside the addressable range (level offset {offset} >= fanout {fanout})")]
    UnsupportedKey { key: u64, offset: u64, fanout: u64 },

    /// The transaction has been closed; no further operations are allowed.
    #[error("transaction is already closed")]
    TransactionClosed,

    /// An internal invariant does not hold. Fatal.
    #[error("illegal state: {reason}")]
    IllegalState { reason: String },
}

impl StorageError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptPage {
            reason: reason.into(),
        }
    }

    pub fn illegal(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }
}

/// Returns the `StorageError` classification of a report, if it carries one.
pub fn storage_error(report: &eyre::Report) -> Option<&StorageError> {
    report.downcast_ref::<StorageError>()
}

/// Returns true if the report classifies as `TransactionClosed`.
pub fn is_transaction_closed(report: &eyre::Report) -> bool {
    matches!(storage_error(report), Some(StorageError::TransactionClosed))
}
