//! # Uber Page
//!
//! The global root of a resource: it references the indirect trie whose
//! leaves are revision-root pages, records the latest committed revision,
//! and fixes the per-level shift exponents of every trie so readers can
//! descend without further configuration.
//!
//! ## Wire Format
//!
//! ```text
//! u64 revision_tree_key          (NULL_ID if no revision committed yet)
//! i32 latest_revision            (-1 before the first commit)
//! u8  revision_exp_count, bytes  (revision-trie shift exponents)
//! repeat 7 times:                (IndexType order)
//!     u8 exp_count, bytes        (per-subtree shift exponents)
//! ```

use eyre::Result;
use smallvec::SmallVec;

use super::reference::PageReference;
use crate::config::constants::INP_LEVEL_PAGE_COUNT_EXPONENT;
use crate::encoding::ByteBuf;
use crate::error::StorageError;
use crate::index::IndexType;
use crate::records::Revision;

type ExpArray = SmallVec<[u8; 6]>;

#[derive(Debug, Clone, PartialEq)]
pub struct UberPage {
    revision_tree_ref: PageReference,
    latest_revision: Revision,
    revision_exps: ExpArray,
    index_exps: [ExpArray; IndexType::ALL.len()],
}

impl UberPage {
    /// Fresh uber page for an empty resource; no revision exists yet.
    pub fn new() -> Self {
        let default_exps: ExpArray = SmallVec::from_slice(&INP_LEVEL_PAGE_COUNT_EXPONENT);
        Self {
            revision_tree_ref: PageReference::null(),
            latest_revision: -1,
            revision_exps: default_exps.clone(),
            index_exps: std::array::from_fn(|_| default_exps.clone()),
        }
    }

    pub fn revision_tree_ref(&self) -> &PageReference {
        &self.revision_tree_ref
    }

    pub fn revision_tree_ref_mut(&mut self) -> &mut PageReference {
        &mut self.revision_tree_ref
    }

    pub fn latest_revision(&self) -> Revision {
        self.latest_revision
    }

    pub fn set_latest_revision(&mut self, revision: Revision) {
        self.latest_revision = revision;
    }

    /// Shift exponents of the revision-root trie.
    pub fn revision_trie_exps(&self) -> &[u8] {
        &self.revision_exps
    }

    /// Shift exponents of the record trie for `index_type`.
    pub fn page_count_exps(&self, index_type: IndexType) -> &[u8] {
        &self.index_exps[index_type.id() as usize]
    }

    pub fn serialize(&self, out: &mut ByteBuf) {
        out.write_u64(self.revision_tree_ref.stored_key());
        out.write_i32(self.latest_revision);
        write_exps(out, &self.revision_exps);
        for exps in &self.index_exps {
            write_exps(out, exps);
        }
    }

    pub fn deserialize(input: &mut ByteBuf) -> Result<Self> {
        let revision_tree_ref = PageReference::from_stored_key(input.read_u64()?);
        let latest_revision = input.read_i32()?;
        let revision_exps = read_exps(input)?;
        let mut index_exps: [ExpArray; IndexType::ALL.len()] =
            std::array::from_fn(|_| SmallVec::new());
        for exps in index_exps.iter_mut() {
            *exps = read_exps(input)?;
        }
        Ok(Self {
            revision_tree_ref,
            latest_revision,
            revision_exps,
            index_exps,
        })
    }
}

impl Default for UberPage {
    fn default() -> Self {
        Self::new()
    }
}

fn write_exps(out: &mut ByteBuf, exps: &[u8]) {
    out.write_u8(exps.len() as u8);
    out.write_bytes(exps);
}

fn read_exps(input: &mut ByteBuf) -> Result<ExpArray> {
    let count = input.read_u8()? as usize;
    if count == 0 || count > 10 {
        return Err(StorageError::corrupt(format!("trie level count {count} out of range")).into());
    }
    Ok(SmallVec::from_slice(input.read_bytes(count)?))
}
