//! # Key-Value Leaf Page
//!
//! The leaf of every revisioned trie: up to `NDP_NODE_COUNT` records for one
//! contiguous node-key range. Records live in three layered forms:
//!
//! - `records` — materialized records (what callers see),
//! - `slots` — serialized payloads small enough to inline,
//! - `overflow_refs` — references to overflow pages for payloads larger
//!   than `MAX_RECORD_SIZE`.
//!
//! A node key appears in `slots` or `overflow_refs`, never both. The
//! inline/overflow split is computed once per dirty cycle when the page is
//! serialized; afterwards the cached serialized form is reused until a
//! mutation invalidates it.
//!
//! ## Wire Format
//!
//! ```text
//! varint  record_page_key
//! i32     revision
//! -- if dewey ids are stored and the persister has a delta codec:
//! i32     dewey_count
//! repeat dewey_count times:
//!     dewey_id_delta     (codec-defined, against the previous id)
//!     varint node_key
//!     i32    slot_len
//!     bytes  slot_data
//! -- always:
//! bitset  slot_bits          (NDP_NODE_COUNT bits)
//! bitset  overflow_bits
//! i32     slot_entries_count
//! repeat slot_entries_count times:   (ascending node key)
//!     i32   len
//!     bytes data
//! i32     overflow_entries_count
//! repeat overflow_entries_count times:   (ascending node key)
//!     u64   target_page_key
//! u8      index_type_id
//! ```
//!
//! Dewey ids serialize sorted by byte length (lexicographic on ties), each
//! delta-compressed against its predecessor. A slot written through the
//! dewey section is excluded from the bitset-driven sections, so each
//! record appears on the wire exactly once.
//!
//! ## Thread Safety
//!
//! Not thread safe; a page belongs to exactly one transaction, and `put`
//! must not interleave with `serialize` from another thread.

use std::collections::BTreeMap;

use eyre::Result;
use hashbrown::HashMap;

use super::arena::PageArena;
use super::overflow::OverflowPage;
use super::reference::PageReference;
use super::Page;
use crate::config::constants::{MAX_RECORD_SIZE, NDP_NODE_COUNT};
use crate::config::ResourceConfig;
use crate::encoding::{get_var_u64, put_var_u64, BitSet, ByteBuf};
use crate::error::StorageError;
use crate::index::IndexType;
use crate::records::{
    dewey_order, record_page_key, record_page_offset, DataRecord, NodeKey, RecordPageKey,
    RecordSerializer, Revision,
};

#[derive(Debug, Clone)]
pub struct KeyValuePage<S: RecordSerializer> {
    record_page_key: RecordPageKey,
    revision: Revision,
    index_type: IndexType,
    records: HashMap<NodeKey, S::Record>,
    slots: BTreeMap<NodeKey, Vec<u8>>,
    overflow_refs: BTreeMap<NodeKey, PageReference>,
    dewey_index: HashMap<Vec<u8>, NodeKey>,
    /// False while mutations since the last reference pass are pending.
    added_references: bool,
    /// Last serialized form; reused until a mutation invalidates it.
    cached_bytes: Option<Vec<u8>>,
    /// Digest of the cached serialized form.
    // TODO: compute and expose the real content digest once the commit path
    // verifies page digests; until then only the placeholder is carried.
    content_hash: Option<Vec<u8>>,
}

impl<S: RecordSerializer> KeyValuePage<S> {
    /// Fresh empty leaf for `record_page_key`, created in `revision`.
    pub fn new(record_page_key: RecordPageKey, index_type: IndexType, revision: Revision) -> Self {
        Self {
            record_page_key,
            revision,
            index_type,
            records: HashMap::new(),
            slots: BTreeMap::new(),
            overflow_refs: BTreeMap::new(),
            dewey_index: HashMap::new(),
            added_references: false,
            cached_bytes: None,
            content_hash: None,
        }
    }

    pub fn record_page_key(&self) -> RecordPageKey {
        self.record_page_key
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Materialized record for `key`, if present. Overflow records that
    /// have not been fetched yet are not visible here; see
    /// [`Self::get_or_fetch`].
    pub fn get(&self, key: NodeKey) -> Option<&S::Record> {
        self.records.get(&key)
    }

    /// Record for `key`, fetching and memoizing its overflow page if the
    /// record spilled. `fetch` resolves an overflow reference to its page.
    pub fn get_or_fetch<F>(
        &mut self,
        key: NodeKey,
        serializer: &S,
        fetch: F,
    ) -> Result<Option<&S::Record>>
    where
        F: FnOnce(&PageReference) -> Result<OverflowPage>,
    {
        if self.records.contains_key(&key) {
            return Ok(self.records.get(&key));
        }
        let Some(reference) = self.overflow_refs.get(&key) else {
            return Ok(None);
        };
        if reference.page_key().is_none() && reference.handle().is_none() {
            return Err(StorageError::DanglingReference { node_key: key }.into());
        }
        let overflow = fetch(reference)?;
        let mut input = ByteBuf::from_vec(overflow.into_data());
        let record = serializer.deserialize(&mut input, key, None)?;
        self.records.insert(key, record);
        Ok(self.records.get(&key))
    }

    /// Inserts or replaces a record; invalidates the cached serialized form
    /// so the next `serialize` recomputes slots and overflow references.
    pub fn set_record(&mut self, record: S::Record) -> Result<()> {
        let key = record.node_key();
        if record_page_key(key) != self.record_page_key {
            return Err(StorageError::illegal(format!(
                "node key {key} does not belong to record page {}",
                self.record_page_key
            ))
            .into());
        }
        if let Some(old) = self.records.get(&key) {
            if let Some(id) = old.dewey_id() {
                self.dewey_index.remove(id);
            }
        }
        self.slots.remove(&key);
        self.overflow_refs.remove(&key);
        self.records.insert(key, record);
        self.added_references = false;
        self.cached_bytes = None;
        self.content_hash = None;
        Ok(())
    }

    /// Installs an overflow reference directly (used when rebuilding a page
    /// from a log container).
    pub fn set_reference(&mut self, key: NodeKey, reference: PageReference) {
        self.overflow_refs.insert(key, reference);
    }

    pub fn reference(&self, key: NodeKey) -> Option<&PageReference> {
        self.overflow_refs.get(&key)
    }

    /// Lazy view over the materialized records.
    pub fn entries(&self) -> impl Iterator<Item = (NodeKey, &S::Record)> {
        self.records.iter().map(|(&key, record)| (key, record))
    }

    pub fn values(&self) -> impl Iterator<Item = &S::Record> {
        self.records.values()
    }

    /// Number of distinct node keys present in any form.
    pub fn len(&self) -> usize {
        self.records.len()
            + self
                .overflow_refs
                .keys()
                .filter(|key| !self.records.contains_key(*key))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.overflow_refs.is_empty()
    }

    pub fn contains_key(&self, key: NodeKey) -> bool {
        self.records.contains_key(&key) || self.overflow_refs.contains_key(&key)
    }

    /// Frees the cached serialized form (typically after a commit).
    pub fn clear_bytes(&mut self) {
        self.cached_bytes = None;
        self.content_hash = None;
    }

    pub fn content_hash(&self) -> Option<&[u8]> {
        self.content_hash.as_deref()
    }

    /// Computes the inline/overflow split ahead of a commit, so overflow
    /// references exist before the write path persists them.
    pub fn prepare_references(
        &mut self,
        cfg: &ResourceConfig<S>,
        arena: &mut PageArena<S>,
    ) -> Result<()> {
        self.add_references(cfg, arena)
    }

    /// Hands every live overflow reference to `persist` so the write path
    /// can store the overflow pages before the leaf itself is written.
    pub fn commit_overflow<F>(&mut self, mut persist: F) -> Result<()>
    where
        F: FnMut(NodeKey, &mut PageReference) -> Result<()>,
    {
        for (&key, reference) in self.overflow_refs.iter_mut() {
            if !reference.is_null() {
                persist(key, reference)?;
            }
        }
        Ok(())
    }

    /// Folds every record of `older` that this page does not yet cover into
    /// this page. Used by the revisioning combine: callers fold from the
    /// newest leaf toward the oldest, so presence here always wins.
    pub(crate) fn merge_missing_from(&mut self, older: &KeyValuePage<S>) {
        for (&key, record) in &older.records {
            if !self.contains_key(key) {
                self.records.insert(key, record.clone());
            }
        }
        for (&key, reference) in &older.overflow_refs {
            if !self.contains_key(key) {
                self.overflow_refs.insert(key, *reference);
            }
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Computes the inline/overflow split for every record not yet placed.
    /// Runs once per dirty cycle.
    fn add_references(
        &mut self,
        cfg: &ResourceConfig<S>,
        arena: &mut PageArena<S>,
    ) -> Result<()> {
        if self.added_references {
            return Ok(());
        }

        let mut scratch = ByteBuf::new();
        let mut keys: Vec<NodeKey> = self.records.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            if self.slots.contains_key(&key) || self.overflow_refs.contains_key(&key) {
                continue;
            }
            let record = &self.records[&key];
            scratch.clear();
            cfg.serializer.serialize(&mut scratch, record)?;
            if scratch.len() > MAX_RECORD_SIZE {
                let page = OverflowPage::new(scratch.as_slice().to_vec());
                let handle = arena.alloc(Page::Overflow(page));
                self.overflow_refs
                    .insert(key, PageReference::in_memory(handle));
            } else {
                self.slots.insert(key, scratch.as_slice().to_vec());
            }
        }

        if cfg.dewey_serialization() {
            for record in self.records.values() {
                let key = record.node_key();
                if let Some(id) = record.dewey_id() {
                    if key != 0 && self.slots.contains_key(&key) {
                        self.dewey_index.insert(id.to_vec(), key);
                    }
                }
            }
        }

        self.added_references = true;
        Ok(())
    }

    pub fn serialize(
        &mut self,
        out: &mut ByteBuf,
        cfg: &ResourceConfig<S>,
        arena: &mut PageArena<S>,
    ) -> Result<()> {
        if let Some(bytes) = &self.cached_bytes {
            out.write_bytes(bytes);
            return Ok(());
        }

        self.add_references(cfg, arena)?;

        let mut body = ByteBuf::new();
        put_var_u64(&mut body, self.record_page_key);
        body.write_i32(self.revision);

        // Keys serialized through the dewey section; their slots stay out
        // of the bitset-driven sections below.
        let mut dewey_keys: std::collections::BTreeSet<NodeKey> = std::collections::BTreeSet::new();

        if cfg.dewey_serialization() {
            let codec = cfg
                .serializer
                .dewey_codec()
                .ok_or_else(|| StorageError::illegal("dewey serialization without codec"))?;
            body.write_i32(self.dewey_index.len() as i32);

            let mut ids: Vec<&Vec<u8>> = self.dewey_index.keys().collect();
            ids.sort_by(|a, b| dewey_order(a, b));

            let mut prev: Option<&[u8]> = None;
            for id in ids {
                codec.serialize_delta(&mut body, prev, id);
                let key = self.dewey_index[id];
                let slot = self.slots.get(&key).ok_or_else(|| {
                    StorageError::illegal(format!("dewey-indexed key {key} has no slot"))
                })?;
                put_var_u64(&mut body, key);
                body.write_i32(slot.len() as i32);
                body.write_bytes(slot);
                dewey_keys.insert(key);
                prev = Some(id.as_slice());
            }
        }

        let mut slot_bits = BitSet::new(NDP_NODE_COUNT);
        for &key in self.slots.keys() {
            if !dewey_keys.contains(&key) {
                slot_bits.set(record_page_offset(key));
            }
        }
        let mut overflow_bits = BitSet::new(NDP_NODE_COUNT);
        for &key in self.overflow_refs.keys() {
            overflow_bits.set(record_page_offset(key));
        }
        slot_bits.serialize(&mut body);
        overflow_bits.serialize(&mut body);

        body.write_i32((self.slots.len() - dewey_keys.len()) as i32);
        for (key, data) in &self.slots {
            if dewey_keys.contains(key) {
                continue;
            }
            body.write_i32(data.len() as i32);
            body.write_bytes(data);
        }

        body.write_i32(self.overflow_refs.len() as i32);
        for reference in self.overflow_refs.values() {
            body.write_u64(reference.stored_key());
        }

        body.write_u8(self.index_type.id());

        out.write_bytes(body.as_slice());
        self.content_hash = Some(Vec::new());
        self.cached_bytes = Some(body.into_vec());
        Ok(())
    }

    pub fn deserialize(input: &mut ByteBuf, cfg: &ResourceConfig<S>) -> Result<Self> {
        let page_key = get_var_u64(input)?;
        let revision = input.read_i32()?;

        let mut records = HashMap::new();

        if cfg.dewey_serialization() {
            let codec = cfg
                .serializer
                .dewey_codec()
                .ok_or_else(|| StorageError::illegal("dewey serialization without codec"))?;
            let dewey_count = input.read_i32()?;
            if dewey_count < 0 || dewey_count as usize > NDP_NODE_COUNT {
                return Err(StorageError::corrupt(format!(
                    "dewey record count {dewey_count} out of range"
                ))
                .into());
            }
            let mut prev: Option<Vec<u8>> = None;
            for _ in 0..dewey_count {
                let id = codec.deserialize_delta(input, prev.as_deref())?;
                let key = get_var_u64(input)?;
                let data_len = input.read_i32()?;
                if data_len < 0 {
                    return Err(
                        StorageError::corrupt(format!("negative slot length {data_len}")).into(),
                    );
                }
                let data = input.read_vec(data_len as usize)?;
                let mut slot = ByteBuf::from_vec(data);
                let record = cfg.serializer.deserialize(&mut slot, key, Some(&id))?;
                records.insert(key, record);
                prev = Some(id);
            }
        }

        let slot_bits = BitSet::deserialize(input)?;
        let overflow_bits = BitSet::deserialize(input)?;

        let slot_count = input.read_i32()?;
        if slot_count < 0 || slot_count as usize != slot_bits.count_ones() {
            return Err(StorageError::corrupt(format!(
                "slot entry count {slot_count} disagrees with bitset ({} bits set)",
                slot_bits.count_ones()
            ))
            .into());
        }
        for offset in slot_bits.iter_ones() {
            let key = page_key * NDP_NODE_COUNT as u64 + offset as u64;
            let data_len = input.read_i32()?;
            if data_len < 0 {
                return Err(
                    StorageError::corrupt(format!("negative slot length {data_len}")).into(),
                );
            }
            let data = input.read_vec(data_len as usize)?;
            let mut slot = ByteBuf::from_vec(data);
            let record = cfg.serializer.deserialize(&mut slot, key, None)?;
            records.insert(key, record);
        }

        let overflow_count = input.read_i32()?;
        if overflow_count < 0 || overflow_count as usize != overflow_bits.count_ones() {
            return Err(StorageError::corrupt(format!(
                "overflow entry count {overflow_count} disagrees with bitset ({} bits set)",
                overflow_bits.count_ones()
            ))
            .into());
        }
        let mut overflow_refs = BTreeMap::new();
        for offset in overflow_bits.iter_ones() {
            let key = page_key * NDP_NODE_COUNT as u64 + offset as u64;
            let reference = PageReference::from_stored_key(input.read_u64()?);
            overflow_refs.insert(key, reference);
        }

        let index_type = IndexType::from_id(input.read_u8()?)?;

        Ok(Self {
            record_page_key: page_key,
            revision,
            index_type,
            records,
            slots: BTreeMap::new(),
            overflow_refs,
            dewey_index: HashMap::new(),
            added_references: false,
            cached_bytes: None,
            content_hash: None,
        })
    }
}

impl<S: RecordSerializer> PartialEq for KeyValuePage<S>
where
    S::Record: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.record_page_key == other.record_page_key
            && self.records == other.records
            && self.overflow_refs == other.overflow_refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::NULL_ID;
    use crate::records::{RawRecord, RawRecordSerializer};

    type KvPage = KeyValuePage<RawRecordSerializer>;

    fn config() -> ResourceConfig<RawRecordSerializer> {
        ResourceConfig::new(RawRecordSerializer::default())
    }

    fn dewey_config() -> ResourceConfig<RawRecordSerializer> {
        config().with_dewey_ids(true)
    }

    fn roundtrip(page: &mut KvPage, cfg: &ResourceConfig<RawRecordSerializer>) -> KvPage {
        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, cfg, &mut arena).unwrap();
        KvPage::deserialize(&mut buf, cfg).unwrap()
    }

    #[test]
    fn inline_roundtrip_recovers_records_and_bitsets() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        page.set_record(RawRecord::new(5, b"aa".to_vec())).unwrap();
        page.set_record(RawRecord::new(300, b"bb".to_vec())).unwrap();

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        // Walk the header to check the occupancy bitsets directly.
        get_var_u64(&mut buf).unwrap();
        buf.read_i32().unwrap();
        let slot_bits = BitSet::deserialize(&mut buf).unwrap();
        let overflow_bits = BitSet::deserialize(&mut buf).unwrap();
        assert_eq!(slot_bits.iter_ones().collect::<Vec<_>>(), vec![5, 300]);
        assert_eq!(overflow_bits.count_ones(), 0);

        let decoded = roundtrip(&mut page, &cfg);
        assert_eq!(decoded, page);
        assert_eq!(decoded.get(5).unwrap().payload(), b"aa");
        assert_eq!(decoded.get(300).unwrap().payload(), b"bb");
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn oversized_records_spill_into_overflow_references() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        // Serialized form is payload plus the one-byte kind tag.
        page.set_record(RawRecord::new(1, vec![0xAB; MAX_RECORD_SIZE]))
            .unwrap();
        page.set_record(RawRecord::new(2, vec![0xCD; MAX_RECORD_SIZE - 1]))
            .unwrap();

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        assert!(page.reference(1).is_some());
        assert!(page.reference(2).is_none());
        assert_eq!(arena.len(), 1);

        let handle = page.reference(1).unwrap().handle().unwrap();
        match arena.get(handle).unwrap() {
            Page::Overflow(overflow) => assert_eq!(overflow.data().len(), MAX_RECORD_SIZE + 1),
            other => panic!("expected overflow page, got {other:?}"),
        }
    }

    #[test]
    fn unpersisted_overflow_reference_encodes_null_id_and_dangles() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        page.set_record(RawRecord::new(1, vec![1; MAX_RECORD_SIZE + 10]))
            .unwrap();

        let mut decoded = roundtrip(&mut page, &cfg);
        assert_eq!(decoded.reference(1).unwrap().stored_key(), NULL_ID);

        let err = decoded
            .get_or_fetch(1, &cfg.serializer, |_| {
                panic!("fetch must not run for a dangling reference")
            })
            .unwrap_err();
        assert!(matches!(
            crate::error::storage_error(&err),
            Some(StorageError::DanglingReference { node_key: 1 })
        ));
    }

    #[test]
    fn get_or_fetch_memoizes_overflow_records() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        let payload = vec![0x5A; MAX_RECORD_SIZE + 1];
        page.set_record(RawRecord::new(3, payload.clone())).unwrap();

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        // Simulate the persisted overflow page the reference would resolve to.
        let handle = page.reference(3).unwrap().handle().unwrap();
        let overflow = match arena.take(handle).unwrap() {
            Page::Overflow(overflow) => overflow,
            other => panic!("expected overflow page, got {other:?}"),
        };

        let mut decoded = KvPage::deserialize(&mut buf, &cfg).unwrap();
        decoded.set_reference(3, PageReference::persisted(77));

        let mut fetches = 0;
        let record = decoded
            .get_or_fetch(3, &cfg.serializer, |reference| {
                fetches += 1;
                assert_eq!(reference.page_key(), Some(77));
                Ok(overflow.clone())
            })
            .unwrap()
            .unwrap();
        assert_eq!(record.payload(), payload.as_slice());

        // Second read is served from the memoized record.
        decoded
            .get_or_fetch(3, &cfg.serializer, |_| panic!("must be memoized"))
            .unwrap()
            .unwrap();
        assert_eq!(fetches, 1);
    }

    #[test]
    fn no_key_lands_in_both_slots_and_overflow() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        for key in 0..16u64 {
            let len = if key % 2 == 0 { 8 } else { MAX_RECORD_SIZE + 1 };
            page.set_record(RawRecord::new(key, vec![key as u8; len]))
                .unwrap();
        }

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        for key in 0..16u64 {
            let inline = page.slots.contains_key(&key);
            let spilled = page.overflow_refs.contains_key(&key);
            assert!(inline ^ spilled, "key {key} must be inline xor overflow");
        }
    }

    #[test]
    fn dewey_ids_serialize_by_length_then_lexicographic() {
        let cfg = dewey_config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        page.set_record(RawRecord::new(1, b"a".to_vec()).with_dewey_id(vec![0x01]))
            .unwrap();
        page.set_record(RawRecord::new(2, b"b".to_vec()).with_dewey_id(vec![0x01, 0x02]))
            .unwrap();
        page.set_record(RawRecord::new(3, b"c".to_vec()).with_dewey_id(vec![0x02]))
            .unwrap();

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        get_var_u64(&mut buf).unwrap();
        buf.read_i32().unwrap();
        let dewey_count = buf.read_i32().unwrap();
        assert_eq!(dewey_count, 3);

        let codec = cfg.serializer.dewey_codec().unwrap();
        let mut prev: Option<Vec<u8>> = None;
        let mut ids = Vec::new();
        for _ in 0..dewey_count {
            let id = codec.deserialize_delta(&mut buf, prev.as_deref()).unwrap();
            get_var_u64(&mut buf).unwrap();
            let len = buf.read_i32().unwrap();
            buf.read_bytes(len as usize).unwrap();
            ids.push(id.clone());
            prev = Some(id);
        }
        assert_eq!(ids, vec![vec![0x01], vec![0x02], vec![0x01, 0x02]]);
    }

    #[test]
    fn dewey_roundtrip_restores_ids() {
        let cfg = dewey_config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        page.set_record(RawRecord::new(1, b"x".to_vec()).with_dewey_id(vec![0x01, 0x05]))
            .unwrap();
        page.set_record(RawRecord::new(2, b"y".to_vec()).with_dewey_id(vec![0x01, 0x06]))
            .unwrap();
        // No dewey id: stays in the plain slot section.
        page.set_record(RawRecord::new(9, b"z".to_vec())).unwrap();

        let decoded = roundtrip(&mut page, &cfg);
        assert_eq!(decoded, page);
        assert_eq!(decoded.get(1).unwrap().dewey_id(), Some(&[0x01, 0x05][..]));
        assert_eq!(decoded.get(2).unwrap().dewey_id(), Some(&[0x01, 0x06][..]));
        assert_eq!(decoded.get(9).unwrap().dewey_id(), None);
    }

    #[test]
    fn serialize_reuses_cached_bytes() {
        let cfg = config();
        let mut page = KvPage::new(2, IndexType::Document, 1);
        page.set_record(RawRecord::new(1024, b"v".to_vec())).unwrap();

        let mut arena = PageArena::new();
        let mut first = ByteBuf::new();
        page.serialize(&mut first, &cfg, &mut arena).unwrap();
        let mut second = ByteBuf::new();
        page.serialize(&mut second, &cfg, &mut arena).unwrap();
        assert_eq!(first.as_slice(), second.as_slice());

        // A mutation invalidates the cache; the new form differs.
        page.set_record(RawRecord::new(1025, b"w".to_vec())).unwrap();
        let mut third = ByteBuf::new();
        page.serialize(&mut third, &cfg, &mut arena).unwrap();
        assert_ne!(first.as_slice(), third.as_slice());
    }

    #[test]
    fn tombstones_roundtrip_as_records() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 2);
        page.set_record(RawRecord::tombstone(4)).unwrap();

        let decoded = roundtrip(&mut page, &cfg);
        assert!(decoded.get(4).unwrap().is_tombstone());
    }

    #[test]
    fn foreign_node_key_is_rejected() {
        let mut page = KvPage::new(0, IndexType::Document, 0);
        let err = page
            .set_record(RawRecord::new(512, b"no".to_vec()))
            .unwrap_err();
        assert!(matches!(
            crate::error::storage_error(&err),
            Some(StorageError::IllegalState { .. })
        ));
    }

    #[test]
    fn corrupt_slot_count_is_rejected() {
        let cfg = config();
        let mut page = KvPage::new(0, IndexType::Document, 0);
        page.set_record(RawRecord::new(1, b"aa".to_vec())).unwrap();

        let mut arena = PageArena::new();
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf, &cfg, &mut arena).unwrap();

        // Flip the slot-entry count (right after the two 8-word bitsets).
        let mut bytes = buf.into_vec();
        let header_len = 1 + 4; // varint page key 0 + revision
        let bitsets_len = 2 * (4 + 64);
        let count_at = header_len + bitsets_len;
        bytes[count_at..count_at + 4].copy_from_slice(&9i32.to_be_bytes());

        let err = KvPage::deserialize(&mut ByteBuf::from_vec(bytes), &cfg).unwrap_err();
        assert!(matches!(
            crate::error::storage_error(&err),
            Some(StorageError::CorruptPage { .. })
        ));
    }

    #[test]
    fn merge_prefers_the_newer_page() {
        let mut newer = KvPage::new(0, IndexType::Document, 2);
        newer.set_record(RawRecord::new(1, b"new".to_vec())).unwrap();
        let mut older = KvPage::new(0, IndexType::Document, 1);
        older.set_record(RawRecord::new(1, b"old".to_vec())).unwrap();
        older.set_record(RawRecord::new(2, b"two".to_vec())).unwrap();

        newer.merge_missing_from(&older);
        assert_eq!(newer.get(1).unwrap().payload(), b"new");
        assert_eq!(newer.get(2).unwrap().payload(), b"two");
    }
}
