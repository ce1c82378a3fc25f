//! # StrataDB - Versioned Append-Only Tree Storage
//!
//! StrataDB is an embedded storage engine for versioned, tree-structured
//! data. Every commit produces a new immutable revision; readers bind to
//! any committed revision and see it forever, writers append copy-on-write
//! page snapshots without disturbing a single existing byte.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratadb::{IndexType, RawRecord, RawRecordSerializer, Resource, ResourceConfig};
//!
//! let cfg = ResourceConfig::new(RawRecordSerializer::default());
//! let resource = Resource::create("./my-resource", cfg)?;
//!
//! let mut txn = resource.begin_write()?;
//! txn.put_record(RawRecord::new(1, b"hello".to_vec()), IndexType::Document)?;
//! let revision = txn.commit(Some("ana".into()), Some("initial load".into()))?;
//!
//! let mut read = resource.begin_read(revision)?;
//! let record = read.get_record(1, IndexType::Document)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │        Resource (directory, latch)     │
//! ├───────────────────────────────────────┤
//! │ PageReadTxn          │  PageWriteTxn   │
//! │  caches, combine     │  staging, COW   │
//! ├───────────────────────────────────────┤
//! │        Transaction Logs (in-flight)    │
//! ├───────────────────────────────────────┤
//! │  Page Family: Uber / RevisionRoot /    │
//! │  Indirect / KeyValue / Overflow / Name │
//! ├───────────────────────────────────────┤
//! │  Codec: varint, bitset, byte buffer    │
//! ├───────────────────────────────────────┤
//! │  Append-only file, checksummed blocks  │
//! └───────────────────────────────────────┘
//! ```
//!
//! Record lookups derive a record-page key (`node_key >> 9`), descend the
//! revisioned indirect trie of the requested subtree, collect up to *k*
//! historical leaf diffs, and combine them per the revisioning policy
//! (`Full`, `Differential`, `Incremental`, `SlidingSnapshot`).
//!
//! ## Module Overview
//!
//! - [`resource`]: resource directory handle, bootstrap, transactions entry
//! - [`txn`]: page read/write transactions, caches, transaction logs
//! - [`page`]: the copy-on-write page family
//! - [`revision`]: revisioning policies and the page-combining algorithm
//! - [`records`]: record and persister capabilities, dewey-id codec
//! - [`encoding`]: varint, bitset, and byte-buffer primitives
//! - [`io`]: page reader/writer capabilities over the append-only file
//! - [`memory`]: pooled scratch buffers
//!
//! ## Concurrency Model
//!
//! Transactions are single-threaded and share nothing; each owns its file
//! handle and caches. One write transaction exists per resource at a time.
//! All operations are synchronous.

pub mod config;
pub mod encoding;
pub mod error;
pub mod index;
pub mod io;
pub mod memory;
pub mod page;
pub mod records;
pub mod resource;
pub mod revision;
pub mod txn;

pub use config::ResourceConfig;
pub use error::StorageError;
pub use index::{IndexSet, IndexType};
pub use records::{
    DataRecord, NodeKey, PageKey, RawRecord, RawRecordSerializer, RecordSerializer, Revision,
};
pub use resource::Resource;
pub use revision::RevisionPolicy;
pub use txn::{PageReadTxn, PageWriteTxn};
