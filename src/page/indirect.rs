//! # Indirect Page
//!
//! Interior node of the revisioned tries: a fixed-fanout array of page
//! references routing a key toward its leaf. Immutable once read from
//! disk; a writer works on a clone (`clone_for_write`) and never touches
//! the original.
//!
//! ## Wire Format
//!
//! ```text
//! i32 reference_count
//! repeat reference_count times:
//!     u64 page_key       (NULL_ID for an absent reference)
//! ```

use eyre::Result;

use super::reference::PageReference;
use crate::config::constants::INP_REFERENCE_COUNT;
use crate::encoding::ByteBuf;
use crate::error::StorageError;

/// Per-level slot offsets of `key` under the given shift exponents, most
/// significant level first. Each level consumes the bits above its shift
/// amount; what remains after the last level is zero for an in-range key.
pub fn level_offsets(key: u64, exps: &[u8]) -> Vec<u64> {
    let mut level_key = key;
    exps.iter()
        .map(|&exp| {
            let offset = level_key >> exp;
            level_key -= offset << exp;
            offset
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectPage {
    refs: Vec<PageReference>,
}

impl IndirectPage {
    pub fn new() -> Self {
        Self::with_fanout(INP_REFERENCE_COUNT)
    }

    pub fn with_fanout(fanout: usize) -> Self {
        Self {
            refs: vec![PageReference::null(); fanout],
        }
    }

    pub fn fanout(&self) -> usize {
        self.refs.len()
    }

    pub fn ref_at(&self, offset: usize) -> Option<&PageReference> {
        self.refs.get(offset)
    }

    /// Only meaningful on a writable clone; persisted pages are immutable.
    pub fn set_ref_at(&mut self, offset: usize, reference: PageReference) -> Result<()> {
        let fanout = self.refs.len();
        let slot = self.refs.get_mut(offset).ok_or_else(|| {
            StorageError::illegal(format!("indirect offset {offset} out of fanout {fanout}"))
        })?;
        *slot = reference;
        Ok(())
    }

    pub fn clone_for_write(&self) -> Self {
        self.clone()
    }

    /// References with a live target, paired with their offsets.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &PageReference)> {
        self.refs
            .iter()
            .enumerate()
            .filter(|(_, reference)| !reference.is_null())
    }

    pub fn serialize(&self, out: &mut ByteBuf) {
        out.write_i32(self.refs.len() as i32);
        for reference in &self.refs {
            out.write_u64(reference.stored_key());
        }
    }

    pub fn deserialize(input: &mut ByteBuf) -> Result<Self> {
        let count = input.read_i32()?;
        if count < 0 || count as usize > INP_REFERENCE_COUNT {
            return Err(StorageError::corrupt(format!(
                "indirect reference count {count} out of range"
            ))
            .into());
        }
        let mut refs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            refs.push(PageReference::from_stored_key(input.read_u64()?));
        }
        Ok(Self { refs })
    }
}

impl Default for IndirectPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::NULL_ID;

    #[test]
    fn level_offsets_consume_nine_bit_runs() {
        let key = (0x12u64 << 18) | (0x145 << 9) | 0x1FF;
        assert_eq!(level_offsets(key, &[18, 9, 0]), vec![0x12, 0x145, 0x1FF]);
    }

    #[test]
    fn level_offsets_for_small_keys_route_through_slot_zero() {
        assert_eq!(level_offsets(5, &[27, 18, 9, 0]), vec![0, 0, 0, 5]);
        assert_eq!(level_offsets(0, &[9, 0]), vec![0, 0]);
    }

    #[test]
    fn level_offsets_single_level_is_the_key_itself() {
        assert_eq!(level_offsets(137, &[0]), vec![137]);
    }

    #[test]
    fn fresh_page_is_all_null() {
        let page = IndirectPage::new();
        assert_eq!(page.fanout(), INP_REFERENCE_COUNT);
        assert!(page.occupied().next().is_none());
    }

    #[test]
    fn set_and_get_reference() {
        let mut page = IndirectPage::new();
        page.set_ref_at(7, PageReference::persisted(800)).unwrap();

        assert_eq!(page.ref_at(7).unwrap().page_key(), Some(800));
        assert!(page.ref_at(8).unwrap().is_null());
        assert!(page.ref_at(INP_REFERENCE_COUNT).is_none());
    }

    #[test]
    fn set_out_of_fanout_fails() {
        let mut page = IndirectPage::with_fanout(4);
        assert!(page.set_ref_at(4, PageReference::persisted(1)).is_err());
    }

    #[test]
    fn serialize_roundtrip() {
        let mut page = IndirectPage::with_fanout(8);
        page.set_ref_at(0, PageReference::persisted(100)).unwrap();
        page.set_ref_at(5, PageReference::persisted(2048)).unwrap();

        let mut buf = ByteBuf::new();
        page.serialize(&mut buf);
        assert_eq!(buf.len(), 4 + 8 * 8);

        let decoded = IndirectPage::deserialize(&mut buf).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn absent_references_encode_as_null_id() {
        let page = IndirectPage::with_fanout(2);
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf);

        buf.read_i32().unwrap();
        assert_eq!(buf.read_u64().unwrap(), NULL_ID);
        assert_eq!(buf.read_u64().unwrap(), NULL_ID);
    }

    #[test]
    fn writable_clone_leaves_original_untouched() {
        let page = IndirectPage::with_fanout(4);
        let mut clone = page.clone_for_write();
        clone.set_ref_at(1, PageReference::persisted(9)).unwrap();

        assert!(page.ref_at(1).unwrap().is_null());
        assert_eq!(clone.ref_at(1).unwrap().page_key(), Some(9));
    }

    #[test]
    fn oversized_reference_count_rejected() {
        let mut buf = ByteBuf::new();
        buf.write_i32(INP_REFERENCE_COUNT as i32 + 1);
        assert!(IndirectPage::deserialize(&mut buf).is_err());
    }
}
