//! # Page Family
//!
//! The copy-on-write page hierarchy. The family is closed, so pages travel
//! as one tagged enum with a common kind byte rather than behind dynamic
//! dispatch:
//!
//! ```text
//! UberPage ──> IndirectPage* ──> RevisionRootPage
//!                                  │ (per index type)
//!                                  └──> IndirectPage* ──> KeyValuePage ──> OverflowPage
//!                                  └──> NamePage
//! ```
//!
//! Every page serializes behind a one-byte kind tag; the page-specific body
//! formats live with their types.
//!
//! ## Module Organization
//!
//! - `reference`: the slot through which pages point at each other
//! - `arena`: in-memory page store addressed by opaque handles
//! - `kv`: the key-value leaf (the workhorse)
//! - `overflow`: single-record spill pages
//! - `indirect`: fixed-fanout trie interiors
//! - `revision_root`, `uber`: revision entry points
//! - `name`: the per-revision name dictionary

mod arena;
mod indirect;
mod kv;
mod name;
mod overflow;
mod reference;
mod revision_root;
mod uber;

pub use arena::PageArena;
pub use indirect::{level_offsets, IndirectPage};
pub use kv::KeyValuePage;
pub use name::NamePage;
pub use overflow::OverflowPage;
pub use reference::{PageHandle, PageReference, RefTarget};
pub use revision_root::RevisionRootPage;
pub use uber::UberPage;

use eyre::Result;

use crate::config::ResourceConfig;
use crate::encoding::ByteBuf;
use crate::error::StorageError;
use crate::records::RecordSerializer;

/// Kind tag of a serialized page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    KeyValue = 1,
    Indirect = 2,
    Overflow = 3,
    RevisionRoot = 4,
    Uber = 5,
    Name = 6,
}

impl PageKind {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => PageKind::KeyValue,
            2 => PageKind::Indirect,
            3 => PageKind::Overflow,
            4 => PageKind::RevisionRoot,
            5 => PageKind::Uber,
            6 => PageKind::Name,
            other => {
                return Err(StorageError::corrupt(format!("unknown page kind {other}")).into())
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum Page<S: RecordSerializer> {
    KeyValue(KeyValuePage<S>),
    Indirect(IndirectPage),
    Overflow(OverflowPage),
    RevisionRoot(RevisionRootPage),
    Uber(UberPage),
    Name(NamePage),
}

impl<S: RecordSerializer> Page<S> {
    pub fn kind(&self) -> PageKind {
        match self {
            Page::KeyValue(_) => PageKind::KeyValue,
            Page::Indirect(_) => PageKind::Indirect,
            Page::Overflow(_) => PageKind::Overflow,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Uber(_) => PageKind::Uber,
            Page::Name(_) => PageKind::Name,
        }
    }

    /// Serializes the kind tag followed by the page body.
    pub fn serialize(
        &mut self,
        out: &mut ByteBuf,
        cfg: &ResourceConfig<S>,
        arena: &mut PageArena<S>,
    ) -> Result<()> {
        out.write_u8(self.kind() as u8);
        match self {
            Page::KeyValue(page) => page.serialize(out, cfg, arena)?,
            Page::Indirect(page) => page.serialize(out),
            Page::Overflow(page) => page.serialize(out),
            Page::RevisionRoot(page) => page.serialize(out),
            Page::Uber(page) => page.serialize(out),
            Page::Name(page) => page.serialize(out),
        }
        Ok(())
    }

    pub fn deserialize(input: &mut ByteBuf, cfg: &ResourceConfig<S>) -> Result<Self> {
        let kind = PageKind::from_id(input.read_u8()?)?;
        Ok(match kind {
            PageKind::KeyValue => Page::KeyValue(KeyValuePage::deserialize(input, cfg)?),
            PageKind::Indirect => Page::Indirect(IndirectPage::deserialize(input)?),
            PageKind::Overflow => Page::Overflow(OverflowPage::deserialize(input)?),
            PageKind::RevisionRoot => Page::RevisionRoot(RevisionRootPage::deserialize(input)?),
            PageKind::Uber => Page::Uber(UberPage::deserialize(input)?),
            PageKind::Name => Page::Name(NamePage::deserialize(input)?),
        })
    }

    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Page::Indirect(page) => Ok(page),
            other => Err(kind_mismatch("indirect", other.kind())),
        }
    }

    pub fn as_key_value(&self) -> Result<&KeyValuePage<S>> {
        match self {
            Page::KeyValue(page) => Ok(page),
            other => Err(kind_mismatch("key-value", other.kind())),
        }
    }

    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Page::RevisionRoot(page) => Ok(page),
            other => Err(kind_mismatch("revision root", other.kind())),
        }
    }

    pub fn as_overflow(&self) -> Result<&OverflowPage> {
        match self {
            Page::Overflow(page) => Ok(page),
            other => Err(kind_mismatch("overflow", other.kind())),
        }
    }

    pub fn as_name(&self) -> Result<&NamePage> {
        match self {
            Page::Name(page) => Ok(page),
            other => Err(kind_mismatch("name", other.kind())),
        }
    }

    pub fn into_key_value(self) -> Result<KeyValuePage<S>> {
        match self {
            Page::KeyValue(page) => Ok(page),
            other => Err(kind_mismatch("key-value", other.kind())),
        }
    }
}

fn kind_mismatch(expected: &str, actual: PageKind) -> eyre::Report {
    StorageError::illegal(format!("expected {expected} page, found {actual:?}")).into()
}
