//! # Index Types
//!
//! A revision root carries one indirect trie per index type. The document
//! trie holds the primary records; the remaining tries are maintained for
//! consumers (index controllers) that request index-typed record pages.
//! StrataDB itself only routes keys to the right trie and the right
//! per-transaction cache.

use eyre::Result;

use crate::error::StorageError;

/// The parallel indirect tries a revision root can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexType {
    Document = 0,
    ChangedNodes = 1,
    RecordToRevisions = 2,
    PathSummary = 3,
    Cas = 4,
    Path = 5,
    Name = 6,
}

impl IndexType {
    pub const ALL: [IndexType; 7] = [
        IndexType::Document,
        IndexType::ChangedNodes,
        IndexType::RecordToRevisions,
        IndexType::PathSummary,
        IndexType::Cas,
        IndexType::Path,
        IndexType::Name,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| StorageError::corrupt(format!("unknown index type id {id}")).into())
    }

    /// Which per-transaction cache family serves this trie.
    pub fn cache_family(self) -> CacheFamily {
        match self {
            IndexType::PathSummary | IndexType::Path => CacheFamily::Path,
            IndexType::Cas => CacheFamily::Value,
            _ => CacheFamily::Record,
        }
    }
}

/// Cache family a record lookup is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFamily {
    Record,
    Path,
    Value,
}

/// Optional index families a resource maintains. The document,
/// changed-nodes, record-to-revisions, and name tries always exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSet {
    pub path: bool,
    pub cas: bool,
}

impl IndexSet {
    pub fn with_path(mut self) -> Self {
        self.path = true;
        self
    }

    pub fn with_cas(mut self) -> Self {
        self.cas = true;
        self
    }

    /// True when lookups against `index_type` are permitted under this set.
    pub fn supports(&self, index_type: IndexType) -> bool {
        match index_type.cache_family() {
            CacheFamily::Record => true,
            CacheFamily::Path => self.path,
            CacheFamily::Value => self.cas,
        }
    }
}
