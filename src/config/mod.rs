//! # Resource Configuration
//!
//! A resource is one versioned tree plus its index subtrees inside a
//! directory on disk. `ResourceConfig` fixes everything about a resource
//! that must agree between the writer that produced a revision and any
//! reader that later binds to it:
//!
//! - the record persister (and with it the record type),
//! - whether dewey ids are stored alongside records,
//! - the revisioning policy and its restore window,
//! - which optional index families (path, CAS) are maintained.
//!
//! The configuration is supplied once at `Resource::create` and must be
//! passed identically to `Resource::open`; it is deliberately not persisted
//! so that the record type stays a compile-time property.

pub mod constants;

use crate::index::IndexSet;
use crate::records::RecordSerializer;
use crate::revision::RevisionPolicy;

/// Immutable per-resource configuration, shared by all transactions.
#[derive(Debug, Clone)]
pub struct ResourceConfig<S> {
    /// Record persister for every record-bearing page of this resource.
    pub serializer: S,
    /// Store hierarchical dewey order keys next to records.
    pub store_dewey_ids: bool,
    /// How historical leaves are chained and recombined.
    pub revision_policy: RevisionPolicy,
    /// Upper bound on the number of historical leaves fetched per page.
    pub revisions_to_restore: u32,
    /// Optional index families maintained for this resource.
    pub indexes: IndexSet,
}

impl<S: RecordSerializer> ResourceConfig<S> {
    pub fn new(serializer: S) -> Self {
        Self {
            serializer,
            store_dewey_ids: false,
            revision_policy: RevisionPolicy::SlidingSnapshot,
            revisions_to_restore: 3,
            indexes: IndexSet::default(),
        }
    }

    pub fn with_dewey_ids(mut self, store: bool) -> Self {
        self.store_dewey_ids = store;
        self
    }

    pub fn with_revision_policy(mut self, policy: RevisionPolicy) -> Self {
        self.revision_policy = policy;
        self
    }

    pub fn with_revisions_to_restore(mut self, revisions: u32) -> Self {
        self.revisions_to_restore = revisions.max(1);
        self
    }

    pub fn with_indexes(mut self, indexes: IndexSet) -> Self {
        self.indexes = indexes;
        self
    }

    /// True when dewey-delta serialization applies: the resource stores
    /// dewey ids and the persister actually provides the delta codec.
    pub fn dewey_serialization(&self) -> bool {
        self.store_dewey_ids && self.serializer.dewey_codec().is_some()
    }
}
