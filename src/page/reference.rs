//! # Page Reference
//!
//! A reference is the slot through which one page points at another. At any
//! moment exactly one target variant is authoritative:
//!
//! - `Persisted(page_key)` — the page lives in the resource file,
//! - `Logged(log_key)` — the page is staged in a transaction log,
//! - `InMemory(handle)` — the page sits in a write transaction's arena,
//! - `Null` — nothing there yet.
//!
//! References never hold pages directly: in-memory targets are opaque arena
//! handles, so the page graph stays acyclic from the borrow checker's point
//! of view even though a page contains references and a reference can name
//! a page.
//!
//! ## Lifecycle
//!
//! ```text
//! Null ──put──> InMemory ──commit──> Persisted
//!                  │                    ▲
//!                  └──stage──> Logged ──┘
//! ```
//!
//! A reference read back from disk is always `Persisted` or `Null`.

use crate::config::constants::NULL_ID;
use crate::index::IndexType;
use crate::records::PageKey;

/// Opaque handle into a write transaction's page arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefTarget {
    #[default]
    Null,
    Persisted(PageKey),
    Logged(u64),
    InMemory(PageHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageReference {
    target: RefTarget,
    index_type: Option<IndexType>,
}

impl PageReference {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn persisted(page_key: PageKey) -> Self {
        Self {
            target: RefTarget::Persisted(page_key),
            index_type: None,
        }
    }

    pub fn in_memory(handle: PageHandle) -> Self {
        Self {
            target: RefTarget::InMemory(handle),
            index_type: None,
        }
    }

    pub fn logged(log_key: u64) -> Self {
        Self {
            target: RefTarget::Logged(log_key),
            index_type: None,
        }
    }

    /// Decodes a reference from its on-disk key form; `NULL_ID` means null.
    pub fn from_stored_key(page_key: u64) -> Self {
        if page_key == NULL_ID {
            Self::null()
        } else {
            Self::persisted(page_key)
        }
    }

    /// Encodes the reference as its on-disk key form.
    pub fn stored_key(&self) -> u64 {
        match self.target {
            RefTarget::Persisted(key) => key,
            _ => NULL_ID,
        }
    }

    pub fn target(&self) -> RefTarget {
        self.target
    }

    pub fn is_null(&self) -> bool {
        matches!(self.target, RefTarget::Null)
    }

    pub fn page_key(&self) -> Option<PageKey> {
        match self.target {
            RefTarget::Persisted(key) => Some(key),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<PageHandle> {
        match self.target {
            RefTarget::InMemory(handle) => Some(handle),
            _ => None,
        }
    }

    /// Rebinds the reference to its persisted location after a commit.
    pub fn set_persisted(&mut self, page_key: PageKey) {
        self.target = RefTarget::Persisted(page_key);
    }

    pub fn set_in_memory(&mut self, handle: PageHandle) {
        self.target = RefTarget::InMemory(handle);
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.index_type
    }

    /// Tags the reference with the subtree it points into.
    pub fn set_index_type(&mut self, index_type: IndexType) {
        self.index_type = Some(index_type);
    }
}
