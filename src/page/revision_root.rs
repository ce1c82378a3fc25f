//! # Revision Root Page
//!
//! Entry point of one committed revision: the root references of every
//! per-kind indirect trie, the name-page reference, and the commit
//! metadata (timestamp, author, message). A subtree whose root reference
//! is still null has never been written in any revision up to this one;
//! the write path lazily creates the root on first use.
//!
//! ## Wire Format
//!
//! ```text
//! i32  revision
//! u64  max_node_key
//! i64  commit_timestamp_millis
//! u64  subtree_root_key × 7        (IndexType order; NULL_ID if absent)
//! u64  name_page_key               (NULL_ID if absent)
//! u8   author_present  [i32 len, bytes]
//! u8   message_present [i32 len, bytes]
//! ```

use eyre::Result;

use super::reference::PageReference;
use crate::encoding::ByteBuf;
use crate::error::StorageError;
use crate::index::IndexType;
use crate::records::{NodeKey, Revision};

#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRootPage {
    revision: Revision,
    subtree_roots: [PageReference; IndexType::ALL.len()],
    name_page_ref: PageReference,
    /// Highest node key assigned in this revision.
    max_node_key: NodeKey,
    commit_timestamp_millis: i64,
    author: Option<String>,
    commit_message: Option<String>,
}

impl RevisionRootPage {
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            subtree_roots: [PageReference::null(); IndexType::ALL.len()],
            name_page_ref: PageReference::null(),
            max_node_key: 0,
            commit_timestamp_millis: 0,
            author: None,
            commit_message: None,
        }
    }

    /// Writable copy for the next revision; references are carried over so
    /// unchanged subtrees keep pointing at their persisted roots.
    pub fn clone_for_revision(&self, revision: Revision) -> Self {
        let mut next = self.clone();
        next.revision = revision;
        next.commit_timestamp_millis = 0;
        next.author = None;
        next.commit_message = None;
        next
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn subtree_root(&self, index_type: IndexType) -> &PageReference {
        &self.subtree_roots[index_type.id() as usize]
    }

    pub fn subtree_root_mut(&mut self, index_type: IndexType) -> &mut PageReference {
        &mut self.subtree_roots[index_type.id() as usize]
    }

    pub fn name_page_ref(&self) -> &PageReference {
        &self.name_page_ref
    }

    pub fn name_page_ref_mut(&mut self) -> &mut PageReference {
        &mut self.name_page_ref
    }

    pub fn max_node_key(&self) -> NodeKey {
        self.max_node_key
    }

    pub fn set_max_node_key(&mut self, key: NodeKey) {
        self.max_node_key = key;
    }

    pub fn commit_timestamp_millis(&self) -> i64 {
        self.commit_timestamp_millis
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn commit_message(&self) -> Option<&str> {
        self.commit_message.as_deref()
    }

    pub fn set_commit_metadata(
        &mut self,
        timestamp_millis: i64,
        author: Option<String>,
        message: Option<String>,
    ) {
        self.commit_timestamp_millis = timestamp_millis;
        self.author = author;
        self.commit_message = message;
    }

    pub fn serialize(&self, out: &mut ByteBuf) {
        out.write_i32(self.revision);
        out.write_u64(self.max_node_key);
        out.write_i64(self.commit_timestamp_millis);
        for reference in &self.subtree_roots {
            out.write_u64(reference.stored_key());
        }
        out.write_u64(self.name_page_ref.stored_key());
        write_opt_string(out, self.author.as_deref());
        write_opt_string(out, self.commit_message.as_deref());
    }

    pub fn deserialize(input: &mut ByteBuf) -> Result<Self> {
        let revision = input.read_i32()?;
        let max_node_key = input.read_u64()?;
        let commit_timestamp_millis = input.read_i64()?;
        let mut subtree_roots = [PageReference::null(); IndexType::ALL.len()];
        for (slot, index_type) in subtree_roots.iter_mut().zip(IndexType::ALL) {
            let mut reference = PageReference::from_stored_key(input.read_u64()?);
            reference.set_index_type(index_type);
            *slot = reference;
        }
        let name_page_ref = PageReference::from_stored_key(input.read_u64()?);
        let author = read_opt_string(input)?;
        let commit_message = read_opt_string(input)?;
        Ok(Self {
            revision,
            subtree_roots,
            name_page_ref,
            max_node_key,
            commit_timestamp_millis,
            author,
            commit_message,
        })
    }
}

fn write_opt_string(out: &mut ByteBuf, value: Option<&str>) {
    match value {
        Some(text) => {
            out.write_u8(1);
            out.write_i32(text.len() as i32);
            out.write_bytes(text.as_bytes());
        }
        None => out.write_u8(0),
    }
}

fn read_opt_string(input: &mut ByteBuf) -> Result<Option<String>> {
    match input.read_u8()? {
        0 => Ok(None),
        1 => {
            let len = input.read_i32()?;
            if len < 0 {
                return Err(StorageError::corrupt(format!("negative string length {len}")).into());
            }
            let bytes = input.read_vec(len as usize)?;
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::corrupt("commit metadata is not UTF-8").into())
        }
        other => Err(StorageError::corrupt(format!("invalid string flag {other}")).into()),
    }
}
