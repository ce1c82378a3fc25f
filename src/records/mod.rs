//! # Records and Persisters
//!
//! A record is an opaque payload addressed by a 64-bit node key, optionally
//! carrying a dewey id (a variable-length, lexicographically comparable
//! hierarchical order key). The storage core never interprets payloads; a
//! `RecordSerializer` supplied by the resource configuration encodes and
//! decodes them.
//!
//! ## Key Derivation
//!
//! ```text
//! record_page_key(k) = k >> NDP_NODE_COUNT_EXPONENT   // which leaf
//! record_page_offset(k) = k mod NDP_NODE_COUNT        // which slot bit
//! ```
//!
//! ## Capabilities
//!
//! `RecordSerializer` is an ordinary capability object. The dewey delta
//! codec is an optional sub-capability probed via `dewey_codec()`; a
//! persister without one simply never participates in dewey-ordered
//! serialization, regardless of the resource configuration.

mod raw;

pub use raw::{RawRecord, RawRecordSerializer};

use eyre::Result;

use crate::config::constants::{NDP_NODE_COUNT, NDP_NODE_COUNT_EXPONENT};
use crate::encoding::{get_var_u64, put_var_u64, ByteBuf};

/// Unique identifier of a record inside a revision.
pub type NodeKey = u64;

/// Address of a persisted page block in the resource file.
pub type PageKey = u64;

/// Key of the leaf covering a contiguous node-key range.
pub type RecordPageKey = u64;

/// Revision number, dense from 0.
pub type Revision = i32;

/// Leaf key covering `node_key`.
pub fn record_page_key(node_key: NodeKey) -> RecordPageKey {
    node_key >> NDP_NODE_COUNT_EXPONENT
}

/// Slot offset of `node_key` within its leaf.
pub fn record_page_offset(node_key: NodeKey) -> usize {
    (node_key & (NDP_NODE_COUNT as u64 - 1)) as usize
}

/// Dewey ids order by byte length first, lexicographically on ties.
pub fn dewey_order(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// A materialized record.
pub trait DataRecord: Clone + std::fmt::Debug {
    fn node_key(&self) -> NodeKey;

    /// Hierarchical order key, when the resource stores one.
    fn dewey_id(&self) -> Option<&[u8]>;

    /// Deletion markers read as `None` through the transaction API.
    fn is_tombstone(&self) -> bool {
        false
    }
}

/// Encodes and decodes record payloads. The node key and dewey id travel
/// outside the payload (in the slot bitsets and the dewey section), so
/// they are handed in separately on decode.
pub trait RecordSerializer: Clone + std::fmt::Debug {
    type Record: DataRecord;

    fn serialize(&self, out: &mut ByteBuf, record: &Self::Record) -> Result<()>;

    fn deserialize(
        &self,
        input: &mut ByteBuf,
        node_key: NodeKey,
        dewey_id: Option<&[u8]>,
    ) -> Result<Self::Record>;

    /// Deletion marker for `node_key`.
    fn tombstone(&self, node_key: NodeKey) -> Self::Record;

    /// Dewey delta codec, when this persister supports dewey-ordered pages.
    fn dewey_codec(&self) -> Option<&dyn DeweyCodec> {
        None
    }
}

/// Delta codec for consecutive dewey ids in a serialized leaf.
pub trait DeweyCodec {
    fn serialize_delta(&self, out: &mut ByteBuf, prev: Option<&[u8]>, curr: &[u8]);

    fn deserialize_delta(&self, input: &mut ByteBuf, prev: Option<&[u8]>) -> Result<Vec<u8>>;
}

/// Shared-prefix delta codec: emits the length of the prefix shared with
/// the previous id, then the remaining suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixDeweyCodec;

impl DeweyCodec for PrefixDeweyCodec {
    fn serialize_delta(&self, out: &mut ByteBuf, prev: Option<&[u8]>, curr: &[u8]) {
        let shared = prev
            .map(|p| p.iter().zip(curr.iter()).take_while(|(a, b)| a == b).count())
            .unwrap_or(0);
        put_var_u64(out, shared as u64);
        put_var_u64(out, (curr.len() - shared) as u64);
        out.write_bytes(&curr[shared..]);
    }

    fn deserialize_delta(&self, input: &mut ByteBuf, prev: Option<&[u8]>) -> Result<Vec<u8>> {
        let shared = get_var_u64(input)? as usize;
        let suffix_len = get_var_u64(input)? as usize;
        let mut id = Vec::with_capacity(shared + suffix_len);
        if shared > 0 {
            let prev = prev.ok_or_else(|| {
                crate::error::StorageError::corrupt("dewey delta without a base id")
            })?;
            if shared > prev.len() {
                return Err(crate::error::StorageError::corrupt(format!(
                    "dewey shared prefix {shared} exceeds base length {}",
                    prev.len()
                ))
                .into());
            }
            id.extend_from_slice(&prev[..shared]);
        }
        id.extend_from_slice(input.read_bytes(suffix_len)?);
        Ok(id)
    }
}
