//! # Page I/O Capabilities
//!
//! Byte-level I/O is reduced to two capabilities: a `PageReader` that
//! resolves page keys to raw block bytes, and a `PageWriter` that appends
//! blocks and flips the uber head pointer. Page keys are opaque to every
//! layer above this one (the file backend uses byte offsets).
//!
//! A reader is owned exclusively by one transaction and released in its
//! `close`; the writer is owned by the resource's single writer.

mod file;

pub use file::{FileReader, FileWriter, ResourceFileHeader, RESOURCE_FILE_HEADER_SIZE};

use eyre::Result;

use crate::records::PageKey;

/// Read capability over the persistent page store.
pub trait PageReader {
    /// Reads the raw serialized page block stored at `key`.
    fn read(&mut self, key: PageKey) -> Result<Vec<u8>>;

    /// Page key of the current uber page, if any revision was committed.
    fn uber_head(&mut self) -> Result<Option<PageKey>>;

    /// Releases the underlying handle. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Append capability over the persistent page store.
pub trait PageWriter {
    /// Appends a serialized page block, returning its page key.
    fn append(&mut self, bytes: &[u8]) -> Result<PageKey>;

    /// Points the uber head at `key`. Must only be called after every block
    /// the uber page references has been appended and synced.
    fn set_uber_head(&mut self, key: PageKey) -> Result<()>;

    fn sync(&mut self) -> Result<()>;
}
