//! # Page Write Transaction
//!
//! Produces the next revision of a resource. Dirty leaves accumulate in
//! memory and in the transaction logs (so concurrent readers opened while
//! the commit is in flight observe staged state), and `commit` turns them
//! into persisted pages copy-on-write:
//!
//! ```text
//! commit:
//!   1. persist staged overflow pages, patch their references
//!   2. append every dirty leaf
//!   3. rebuild the touched indirect tries bottom-up (cloned paths only)
//!   4. append the name page and the new revision root
//!   5. install the revision root into the revision trie
//!   6. append the new uber page, sync, flip the uber head, sync
//!   7. delete the transaction logs and the commit marker
//! ```
//!
//! A crash before step 6 leaves the previous uber head intact; the
//! half-appended revision is unreachable garbage, which the append-only
//! file tolerates. A crash between 6 and 7 leaves logs behind; they are
//! replayed into the next transaction's view via the commit marker.
//!
//! ## Leaf Seeding
//!
//! What a fresh dirty leaf starts from depends on the revisioning policy:
//! full-dump revisions and differential leaves seed from the combined
//! previous page, incremental leaves start empty. Every policy writes a
//! full dump each `revisions_to_restore` revisions so that read chains
//! stay within the policy's collection bound.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Result;
use hashbrown::HashMap;
use tracing::debug;

use super::log::{LogEntry, LogKind, TransactionLog};
use super::read::PageReadTxn;
use super::Container;
use crate::config::ResourceConfig;
use crate::error::StorageError;
use crate::index::{CacheFamily, IndexType};
use crate::io::{PageReader, PageWriter};
use crate::memory::BufferPool;
use crate::page::{
    IndirectPage, KeyValuePage, NamePage, Page, PageArena, PageReference, RevisionRootPage,
    UberPage,
};
use crate::records::{
    record_page_key, DataRecord, NodeKey, PageKey, RecordPageKey, RecordSerializer, Revision,
};
use crate::revision::RevisionPolicy;

pub struct PageWriteTxn<S: RecordSerializer, R: PageReader, W: PageWriter> {
    prev: Option<PageReadTxn<S, R>>,
    writer: W,
    cfg: Arc<ResourceConfig<S>>,
    uber: UberPage,
    new_revision: Revision,
    arena: PageArena<S>,
    buffers: BufferPool,
    dirty: HashMap<(IndexType, RecordPageKey), KeyValuePage<S>>,
    name_page: NamePage,
    max_node_key: NodeKey,
    page_log: Option<TransactionLog>,
    node_log: Option<TransactionLog>,
    path_log: Option<TransactionLog>,
    value_log: Option<TransactionLog>,
    marker_path: PathBuf,
    latch: Option<Arc<AtomicBool>>,
    finished: bool,
}

impl<S: RecordSerializer, R: PageReader, W: PageWriter> PageWriteTxn<S, R, W> {
    /// Starts a write transaction on top of `prev` (the latest committed
    /// revision, or `None` for the bootstrap commit). Creates the commit
    /// marker and the staging logs.
    pub fn begin(
        prev: Option<PageReadTxn<S, R>>,
        writer: W,
        cfg: Arc<ResourceConfig<S>>,
        marker_path: PathBuf,
        log_dir: PathBuf,
        latch: Option<Arc<AtomicBool>>,
    ) -> Result<Self> {
        let (uber, name_page, new_revision) = match &prev {
            Some(txn) => (
                txn.uber_page()?.clone(),
                txn.name_page_clone(),
                txn.revision()? + 1,
            ),
            None => (UberPage::new(), NamePage::new(), 0),
        };

        std::fs::create_dir_all(&log_dir).map_err(StorageError::from)?;
        File::create(&marker_path).map_err(StorageError::from)?;
        let page_log = Some(TransactionLog::open(&log_dir, LogKind::Page)?);
        let node_log = Some(TransactionLog::open(&log_dir, LogKind::Node)?);
        let path_log = cfg
            .indexes
            .path
            .then(|| TransactionLog::open(&log_dir, LogKind::Path))
            .transpose()?;
        let value_log = cfg
            .indexes
            .cas
            .then(|| TransactionLog::open(&log_dir, LogKind::Value))
            .transpose()?;

        debug!(revision = new_revision, "began page write transaction");
        Ok(Self {
            prev,
            writer,
            cfg,
            uber,
            new_revision,
            arena: PageArena::new(),
            buffers: BufferPool::new(8),
            dirty: HashMap::new(),
            name_page,
            max_node_key: 0,
            page_log,
            node_log,
            path_log,
            value_log,
            marker_path,
            latch,
            finished: false,
        })
    }

    pub fn revision(&self) -> Revision {
        self.new_revision
    }

    /// Inserts or replaces a record in the given subtree.
    pub fn put_record(&mut self, record: S::Record, index_type: IndexType) -> Result<()> {
        if !self.cfg.indexes.supports(index_type) {
            return Err(StorageError::illegal(format!(
                "index type {index_type:?} is not maintained by this resource"
            ))
            .into());
        }
        let node_key = record.node_key();
        self.max_node_key = self.max_node_key.max(node_key);
        let page_key = record_page_key(node_key);
        self.ensure_dirty_leaf(page_key, index_type)?;
        let page = self
            .dirty
            .get_mut(&(index_type, page_key))
            .ok_or_else(|| StorageError::illegal("dirty leaf vanished after seeding"))?;
        page.set_record(record)?;
        self.stage_leaf(page_key, index_type)
    }

    /// Replaces the record with a deletion marker; readers will observe
    /// `None` from this revision on.
    pub fn remove_record(&mut self, node_key: NodeKey, index_type: IndexType) -> Result<()> {
        let tombstone = self.cfg.serializer.tombstone(node_key);
        self.put_record(tombstone, index_type)
    }

    /// Read-your-writes lookup: staged state first, then the previous
    /// revision.
    pub fn get_record(
        &mut self,
        node_key: NodeKey,
        index_type: IndexType,
    ) -> Result<Option<S::Record>> {
        let page_key = record_page_key(node_key);
        if let Some(page) = self.dirty.get(&(index_type, page_key)) {
            if let Some(record) = page.get(node_key) {
                if record.is_tombstone() {
                    return Ok(None);
                }
                return Ok(Some(record.clone()));
            }
        }
        match &mut self.prev {
            Some(prev) => prev.get_record(node_key, index_type),
            None => Ok(None),
        }
    }

    /// Interns a name in the revision's name dictionary.
    pub fn create_name(&mut self, name: &str, kind_class: u8) -> i32 {
        self.name_page.create_name(name, kind_class)
    }

    /// Seeds the dirty leaf for `page_key` according to the policy.
    fn ensure_dirty_leaf(&mut self, page_key: RecordPageKey, index_type: IndexType) -> Result<()> {
        if self.dirty.contains_key(&(index_type, page_key)) {
            return Ok(());
        }
        let policy = self.cfg.revision_policy;
        let revs = self.cfg.revisions_to_restore.max(1);
        let mut leaf = KeyValuePage::new(page_key, index_type, self.new_revision);

        // Differential leaves always carry the complete accumulated page:
        // whichever base leaf the read-side jump lands on is then already
        // subsumed, so the two-leaf combine stays correct for every touch
        // pattern.
        let seed_full = policy.writes_full_leaves(self.new_revision, revs)
            || policy == RevisionPolicy::Differential;
        if let Some(prev) = &mut self.prev {
            if seed_full {
                if let Container::Complete(combined) = prev.container(page_key, index_type)? {
                    leaf.merge_missing_from(&combined);
                }
            }
        }

        self.dirty.insert((index_type, page_key), leaf);
        Ok(())
    }

    /// Writes the complete staged state of a dirty leaf into its staging
    /// log: the dirty records merged over the previous revision's combined
    /// page, so in-flight readers observe the full page, not just the
    /// diff this revision will persist.
    fn stage_leaf(&mut self, page_key: RecordPageKey, index_type: IndexType) -> Result<()> {
        let mut complete = self
            .dirty
            .get(&(index_type, page_key))
            .cloned()
            .ok_or_else(|| StorageError::illegal("staging an unknown dirty leaf"))?;
        if let Some(prev) = &mut self.prev {
            if let Container::Complete(previous) = prev.container(page_key, index_type)? {
                complete.merge_missing_from(&previous);
            }
        }

        let mut bytes = self.buffers.acquire();
        bytes.write_u8(crate::page::PageKind::KeyValue as u8);
        let Self {
            arena,
            cfg,
            node_log,
            path_log,
            value_log,
            ..
        } = self;
        complete.serialize(&mut bytes, cfg, arena)?;
        let log = match index_type.cache_family() {
            CacheFamily::Record => node_log.as_mut(),
            CacheFamily::Path => path_log.as_mut(),
            CacheFamily::Value => value_log.as_mut(),
        }
        .ok_or_else(|| StorageError::illegal("staging log is not enabled"))?;
        log.put(page_key, &LogEntry::Page(bytes.as_slice().to_vec()))
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Turns the staged state into revision `new_revision` and returns it.
    pub fn commit(
        mut self,
        author: Option<String>,
        message: Option<String>,
    ) -> Result<Revision> {
        // 1 + 2: persist overflow pages, then the leaves themselves.
        let mut leaf_keys: HashMap<(IndexType, RecordPageKey), PageKey> = HashMap::new();
        let mut dirty: Vec<((IndexType, RecordPageKey), KeyValuePage<S>)> =
            self.dirty.drain().collect();
        dirty.sort_by_key(|&((index_type, page_key), _)| (index_type.id(), page_key));

        for ((index_type, page_key), mut leaf) in dirty {
            let Self {
                arena,
                writer,
                cfg,
                buffers,
                ..
            } = &mut self;
            leaf.prepare_references(cfg, arena)?;
            leaf.commit_overflow(|_, reference| {
                let Some(handle) = reference.handle() else {
                    return Ok(());
                };
                let mut page = arena.take(handle)?;
                let mut bytes = buffers.acquire();
                page.serialize(&mut bytes, cfg, arena)?;
                reference.set_persisted(writer.append(bytes.as_slice())?);
                Ok(())
            })?;
            // Any staged serialization predates the overflow keys.
            leaf.clear_bytes();
            let mut bytes = self.buffers.acquire();
            bytes.write_u8(crate::page::PageKind::KeyValue as u8);
            leaf.serialize(&mut bytes, &self.cfg, &mut self.arena)?;
            let key = self.writer.append(bytes.as_slice())?;
            leaf_keys.insert((index_type, page_key), key);
        }

        // 3: rebuild the touched tries copy-on-write.
        let mut root = match &self.prev {
            Some(txn) => txn.revision_root()?.clone_for_revision(self.new_revision),
            None => RevisionRootPage::new(self.new_revision),
        };
        let mut by_subtree: HashMap<IndexType, Vec<(RecordPageKey, PageKey)>> = HashMap::new();
        for ((index_type, page_key), leaf_key) in leaf_keys {
            by_subtree
                .entry(index_type)
                .or_default()
                .push((page_key, leaf_key));
        }
        for (index_type, mut leaves) in by_subtree {
            leaves.sort_unstable();
            let exps = self.uber.page_count_exps(index_type).to_vec();
            let mut subtree_ref = *root.subtree_root(index_type);
            for (page_key, leaf_key) in leaves {
                self.install_leaf(&mut subtree_ref, page_key, &exps, leaf_key)?;
            }
            self.persist_ref(&mut subtree_ref)?;
            *root.subtree_root_mut(index_type) = subtree_ref;
        }

        // 4: name page and revision root.
        let mut bytes = self.buffers.acquire();
        let mut name_page = Page::Name(std::mem::take(&mut self.name_page));
        name_page.serialize(&mut bytes, &self.cfg, &mut self.arena)?;
        root.name_page_ref_mut()
            .set_persisted(self.writer.append(bytes.as_slice())?);

        root.set_max_node_key(self.max_node_key.max(match &self.prev {
            Some(txn) => txn.revision_root()?.max_node_key(),
            None => 0,
        }));
        root.set_commit_metadata(unix_millis(), author, message);

        let mut bytes = self.buffers.acquire();
        Page::<S>::RevisionRoot(root).serialize(&mut bytes, &self.cfg, &mut self.arena)?;
        let root_key = self.writer.append(bytes.as_slice())?;

        // 5: install the revision root into the revision trie.
        let exps = self.uber.revision_trie_exps().to_vec();
        let mut revision_tree_ref = *self.uber.revision_tree_ref();
        self.install_leaf(
            &mut revision_tree_ref,
            self.new_revision as u64,
            &exps,
            root_key,
        )?;
        self.persist_ref(&mut revision_tree_ref)?;

        // 6: the new uber page becomes the head.
        *self.uber.revision_tree_ref_mut() = revision_tree_ref;
        self.uber.set_latest_revision(self.new_revision);
        let mut bytes = self.buffers.acquire();
        let mut uber = Page::<S>::Uber(self.uber.clone());
        uber.serialize(&mut bytes, &self.cfg, &mut self.arena)?;
        let uber_key = self.writer.append(bytes.as_slice())?;

        self.writer.sync()?;
        self.writer.set_uber_head(uber_key)?;
        self.writer.sync()?;

        // 7: the staged state has been fully transferred.
        self.teardown_logs()?;
        self.finished = true;
        if let Some(prev) = &mut self.prev {
            prev.close()?;
        }
        self.release_latch();
        debug!(revision = self.new_revision, "committed revision");
        Ok(self.new_revision)
    }

    /// Discards every staged change.
    pub fn abort(mut self) -> Result<()> {
        self.teardown_logs()?;
        self.finished = true;
        if let Some(prev) = &mut self.prev {
            prev.close()?;
        }
        self.release_latch();
        debug!(revision = self.new_revision, "aborted write transaction");
        Ok(())
    }

    fn teardown_logs(&mut self) -> Result<()> {
        for log in [
            self.page_log.take(),
            self.node_log.take(),
            self.path_log.take(),
            self.value_log.take(),
        ]
        .into_iter()
        .flatten()
        {
            log.remove()?;
        }
        if self.marker_path.exists() {
            std::fs::remove_file(&self.marker_path).map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn release_latch(&mut self) {
        if let Some(latch) = self.latch.take() {
            latch.store(false, Ordering::Release);
        }
    }

    // ------------------------------------------------------------------
    // Copy-on-write trie maintenance
    // ------------------------------------------------------------------

    /// Materializes the indirect page behind `reference` in the arena:
    /// already-staged pages are reused, persisted pages are cloned for
    /// write, absent pages are created.
    fn ensure_indirect(&mut self, reference: &PageReference) -> Result<crate::page::PageHandle> {
        if let Some(handle) = reference.handle() {
            return Ok(handle);
        }
        let page = match reference.page_key() {
            Some(key) => {
                let prev = self.prev.as_mut().ok_or_else(|| {
                    StorageError::illegal("persisted trie page without a previous revision")
                })?;
                prev.read_indirect(key)?.clone_for_write()
            }
            None => IndirectPage::new(),
        };
        Ok(self.arena.alloc(Page::Indirect(page)))
    }

    /// Routes `key` through the trie below `root_ref`, cloning every
    /// indirect page on the path, and points the final slot at `leaf_key`.
    fn install_leaf(
        &mut self,
        root_ref: &mut PageReference,
        key: u64,
        exps: &[u8],
        leaf_key: PageKey,
    ) -> Result<()> {
        let mut handle = self.ensure_indirect(root_ref)?;
        root_ref.set_in_memory(handle);

        let offsets = crate::page::level_offsets(key, exps);
        let last_level = offsets.len() - 1;
        for (level, offset) in offsets.into_iter().enumerate() {
            let page = self.arena.get_mut(handle)?;
            let indirect = match page {
                Page::Indirect(indirect) => indirect,
                other => {
                    return Err(StorageError::illegal(format!(
                        "trie interior is a {:?} page",
                        other.kind()
                    ))
                    .into())
                }
            };
            let fanout = indirect.fanout() as u64;
            if offset >= fanout {
                return Err(StorageError::UnsupportedKey {
                    key,
                    offset,
                    fanout,
                }
                .into());
            }
            if level == last_level {
                indirect.set_ref_at(offset as usize, PageReference::persisted(leaf_key))?;
            } else {
                let child_ref = *indirect
                    .ref_at(offset as usize)
                    .ok_or_else(|| StorageError::illegal("offset passed fanout check"))?;
                let child_handle = self.ensure_indirect(&child_ref)?;
                let page = self.arena.get_mut(handle)?;
                let indirect = match page {
                    Page::Indirect(indirect) => indirect,
                    _ => unreachable!("checked above"),
                };
                indirect.set_ref_at(offset as usize, PageReference::in_memory(child_handle))?;
                handle = child_handle;
            }
        }
        Ok(())
    }

    /// Serializes an in-memory trie bottom-up; children are appended
    /// before their parents so every written reference is persisted.
    fn persist_ref(&mut self, reference: &mut PageReference) -> Result<()> {
        let Some(handle) = reference.handle() else {
            return Ok(());
        };
        let mut page = self.arena.take(handle)?;
        if let Page::Indirect(indirect) = &mut page {
            let staged: Vec<usize> = indirect
                .occupied()
                .filter(|(_, slot)| slot.handle().is_some())
                .map(|(offset, _)| offset)
                .collect();
            for offset in staged {
                let mut slot = *indirect
                    .ref_at(offset)
                    .ok_or_else(|| StorageError::illegal("occupied offset within fanout"))?;
                self.persist_ref(&mut slot)?;
                indirect.set_ref_at(offset, slot)?;
            }
        }
        let mut bytes = self.buffers.acquire();
        page.serialize(&mut bytes, &self.cfg, &mut self.arena)?;
        reference.set_persisted(self.writer.append(bytes.as_slice())?);
        Ok(())
    }
}

impl<S: RecordSerializer, R: PageReader, W: PageWriter> Drop for PageWriteTxn<S, R, W> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.teardown_logs();
            if let Some(prev) = &mut self.prev {
                let _ = prev.close();
            }
        }
        self.release_latch();
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl<S: RecordSerializer, R: PageReader, W: PageWriter> std::fmt::Debug for PageWriteTxn<S, R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteTxn")
            .field("new_revision", &self.new_revision)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
