//! # Page Read Transaction
//!
//! Binds to exactly one committed revision of a resource and resolves
//! record lookups. Nothing is shared between transactions: each one owns
//! its page reader, its caches, and (while a commit is in flight) handles
//! to the transaction logs. A transaction must stay on the thread that
//! opened it.
//!
//! ## Lookup Path
//!
//! ```text
//! get_record(node_key, index_type)
//!   │  page_key = node_key >> NDP_NODE_COUNT_EXPONENT
//!   ├─ record/path/value cache ── hit ──> container
//!   └─ miss:
//!        ├─ transaction log (staged leaf wins over persisted state)
//!        └─ collect snapshot leaves over historical revisions,
//!           combine per revisioning policy
//!   container ── tombstone/absent ──> None, else the record
//! ```
//!
//! ## Caches
//!
//! - record cache: capacity 1000, 5000 s TTL,
//! - path/value caches: capacity 20, created only when the resource
//!   config enables the matching index family,
//! - page cache: unbounded, for indirect and metadata pages.
//!
//! A failed load leaves no cache entry behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use hashbrown::HashSet;
use tracing::debug;

use super::cache::TxnCache;
use super::log::{LogEntry, LogKind, TransactionLog};
use super::Container;
use crate::config::constants::{
    INDEX_CACHE_CAPACITY, RECORD_CACHE_CAPACITY, RECORD_CACHE_TTL_SECS,
};
use crate::config::ResourceConfig;
use crate::encoding::ByteBuf;
use crate::error::StorageError;
use crate::index::{CacheFamily, IndexType};
use crate::io::PageReader;
use crate::page::{KeyValuePage, NamePage, Page, PageReference, RevisionRootPage, UberPage};
use crate::records::{
    record_page_key, DataRecord, NodeKey, PageKey, RecordPageKey, RecordSerializer, Revision,
};

pub struct PageReadTxn<S: RecordSerializer, R: PageReader> {
    reader: R,
    cfg: Arc<ResourceConfig<S>>,
    uber: UberPage,
    root: RevisionRootPage,
    name_page: NamePage,
    record_cache: TxnCache<RecordPageKey, Container<S>>,
    path_cache: Option<TxnCache<RecordPageKey, Container<S>>>,
    value_cache: Option<TxnCache<RecordPageKey, Container<S>>>,
    page_cache: TxnCache<PageKey, Page<S>>,
    page_log: Option<TransactionLog>,
    node_log: Option<TransactionLog>,
    path_log: Option<TransactionLog>,
    value_log: Option<TransactionLog>,
    closed: bool,
}

impl<S: RecordSerializer, R: PageReader> PageReadTxn<S, R> {
    /// Opens a transaction bound to `revision`. `log_dir` is the staging
    /// directory of an in-flight commit; `None` means all data lives in
    /// the resource file.
    pub fn open(
        mut reader: R,
        cfg: Arc<ResourceConfig<S>>,
        revision: Revision,
        log_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let uber_key = reader.uber_head()?.ok_or_else(|| {
            StorageError::illegal("resource has no committed revision to read from")
        })?;
        let mut uber_bytes = ByteBuf::from_vec(reader.read(uber_key)?);
        let uber = match Page::<S>::deserialize(&mut uber_bytes, &cfg)? {
            Page::Uber(uber) => uber,
            other => {
                return Err(StorageError::corrupt(format!(
                    "uber head points at a {:?} page",
                    other.kind()
                ))
                .into())
            }
        };
        if revision < 0 || revision > uber.latest_revision() {
            return Err(StorageError::illegal(format!(
                "revision {revision} must be >= 0 and <= latest committed revision {}",
                uber.latest_revision()
            ))
            .into());
        }

        let (page_log, node_log, path_log, value_log) = match &log_dir {
            Some(dir) => (
                Some(TransactionLog::open(dir, LogKind::Page)?),
                Some(TransactionLog::open(dir, LogKind::Node)?),
                cfg.indexes
                    .path
                    .then(|| TransactionLog::open(dir, LogKind::Path))
                    .transpose()?,
                cfg.indexes
                    .cas
                    .then(|| TransactionLog::open(dir, LogKind::Value))
                    .transpose()?,
            ),
            None => (None, None, None, None),
        };

        let mut txn = Self {
            reader,
            cfg: Arc::clone(&cfg),
            uber,
            root: RevisionRootPage::new(revision),
            name_page: NamePage::new(),
            record_cache: TxnCache::bounded(RECORD_CACHE_CAPACITY)
                .with_ttl(Duration::from_secs(RECORD_CACHE_TTL_SECS)),
            path_cache: cfg
                .indexes
                .path
                .then(|| TxnCache::bounded(INDEX_CACHE_CAPACITY)),
            value_cache: cfg
                .indexes
                .cas
                .then(|| TxnCache::bounded(INDEX_CACHE_CAPACITY)),
            page_cache: TxnCache::unbounded(),
            page_log,
            node_log,
            path_log,
            value_log,
            closed: false,
        };

        txn.root = txn.load_revision_root(revision)?;
        txn.name_page = txn.load_name_page()?;
        debug!(revision, logs = log_dir.is_some(), "opened page read transaction");
        Ok(txn)
    }

    fn assert_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::TransactionClosed.into());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn revision(&self) -> Result<Revision> {
        self.assert_not_closed()?;
        Ok(self.root.revision())
    }

    pub fn uber_page(&self) -> Result<&UberPage> {
        self.assert_not_closed()?;
        Ok(&self.uber)
    }

    pub fn revision_root(&self) -> Result<&RevisionRootPage> {
        self.assert_not_closed()?;
        Ok(&self.root)
    }

    pub fn name(&self, name_key: i32, kind_class: u8) -> Result<Option<&str>> {
        self.assert_not_closed()?;
        Ok(self.name_page.name(name_key, kind_class))
    }

    pub fn raw_name(&self, name_key: i32, kind_class: u8) -> Result<Option<&[u8]>> {
        self.assert_not_closed()?;
        Ok(self.name_page.raw_name(name_key, kind_class))
    }

    pub fn name_count(&self, name_key: i32, kind_class: u8) -> Result<u32> {
        self.assert_not_closed()?;
        Ok(self.name_page.count(name_key, kind_class))
    }

    /// Record at `node_key` in the given subtree, or `None` when absent or
    /// deleted at this revision.
    pub fn get_record(
        &mut self,
        node_key: NodeKey,
        index_type: IndexType,
    ) -> Result<Option<S::Record>> {
        self.assert_not_closed()?;
        if !self.cfg.indexes.supports(index_type) {
            return Err(StorageError::illegal(format!(
                "index type {index_type:?} is not maintained by this resource"
            ))
            .into());
        }

        let page_key = record_page_key(node_key);
        let family = index_type.cache_family();

        if !self.family_cache_mut(family)?.contains_live(&page_key) {
            let container = self.load_container(page_key, index_type)?;
            self.family_cache_mut(family)?.insert(page_key, container);
        }

        // Split borrows: the container lives in a cache while overflow
        // resolution needs the reader and the config.
        let Self {
            reader,
            cfg,
            record_cache,
            path_cache,
            value_cache,
            ..
        } = self;
        let cache = match family {
            CacheFamily::Record => record_cache,
            CacheFamily::Path => path_cache
                .as_mut()
                .ok_or_else(|| StorageError::illegal("path cache is not enabled"))?,
            CacheFamily::Value => value_cache
                .as_mut()
                .ok_or_else(|| StorageError::illegal("value cache is not enabled"))?,
        };
        let container = cache
            .get_mut(&page_key)
            .ok_or_else(|| StorageError::illegal("container vanished between load and read"))?;

        let page = match container {
            Container::Empty => return Ok(None),
            Container::Complete(page) => page,
        };
        let record = page.get_or_fetch(node_key, &cfg.serializer, |reference| {
            let overflow_key = reference
                .page_key()
                .ok_or(StorageError::DanglingReference { node_key })?;
            let mut bytes = ByteBuf::from_vec(reader.read(overflow_key)?);
            Ok(Page::<S>::deserialize(&mut bytes, cfg)?.as_overflow()?.clone())
        })?;
        Ok(record.filter(|r| !r.is_tombstone()).cloned())
    }

    /// Invalidates all four caches and truncates every open log.
    pub fn clear_caches(&mut self) -> Result<()> {
        self.assert_not_closed()?;
        self.record_cache.invalidate_all();
        if let Some(cache) = &mut self.path_cache {
            cache.invalidate_all();
        }
        if let Some(cache) = &mut self.value_cache {
            cache.invalidate_all();
        }
        self.page_cache.invalidate_all();
        for log in [
            &mut self.page_log,
            &mut self.node_log,
            &mut self.path_log,
            &mut self.value_log,
        ]
        .into_iter()
        .flatten()
        {
            log.clear()?;
        }
        debug!("cleared transaction caches and logs");
        Ok(())
    }

    /// Closes logs and the underlying reader. Idempotent; never fails
    /// after the first successful close.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for log in [
            self.page_log.take(),
            self.node_log.take(),
            self.path_log.take(),
            self.value_log.take(),
        ]
        .into_iter()
        .flatten()
        {
            log.close();
        }
        self.reader.close()?;
        self.closed = true;
        debug!(revision = self.root.revision(), "closed page read transaction");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Page resolution
    // ------------------------------------------------------------------

    fn family_cache_mut(
        &mut self,
        family: CacheFamily,
    ) -> Result<&mut TxnCache<RecordPageKey, Container<S>>> {
        match family {
            CacheFamily::Record => Ok(&mut self.record_cache),
            CacheFamily::Path => self
                .path_cache
                .as_mut()
                .ok_or_else(|| StorageError::illegal("path cache is not enabled").into()),
            CacheFamily::Value => self
                .value_cache
                .as_mut()
                .ok_or_else(|| StorageError::illegal("value cache is not enabled").into()),
        }
    }

    fn family_log_mut(&mut self, family: CacheFamily) -> Option<&mut TransactionLog> {
        match family {
            CacheFamily::Record => self.node_log.as_mut(),
            CacheFamily::Path => self.path_log.as_mut(),
            CacheFamily::Value => self.value_log.as_mut(),
        }
    }

    /// Loads a decoded page through the page cache, consulting the page
    /// log first while a commit is in flight.
    fn load_page(&mut self, key: PageKey) -> Result<&mut Page<S>> {
        if !self.page_cache.contains_live(&key) {
            let cfg = Arc::clone(&self.cfg);
            let bytes = match &mut self.page_log {
                Some(log) => match log.get(key)? {
                    Some(LogEntry::Page(bytes)) => bytes,
                    Some(LogEntry::Empty) | None => self.reader.read(key)?,
                },
                None => self.reader.read(key)?,
            };
            let page = Page::deserialize(&mut ByteBuf::from_vec(bytes), &cfg)?;
            self.page_cache.insert(key, page);
        }
        self.page_cache
            .get_mut(&key)
            .ok_or_else(|| StorageError::illegal("page vanished from the page cache").into())
    }

    fn load_name_page(&mut self) -> Result<NamePage> {
        match self.root.name_page_ref().page_key() {
            Some(key) => Ok(self.load_page(key)?.as_name()?.clone()),
            None => Ok(NamePage::new()),
        }
    }

    /// Revision root for `revision`, resolved through the revision trie.
    fn load_revision_root(&mut self, revision: Revision) -> Result<RevisionRootPage> {
        if revision < 0 || revision > self.uber.latest_revision() {
            return Err(StorageError::illegal(format!(
                "revision {revision} outside committed range 0..={}",
                self.uber.latest_revision()
            ))
            .into());
        }
        let start = *self.uber.revision_tree_ref();
        let exps = self.uber.revision_trie_exps().to_vec();
        let leaf_ref = self
            .dereference_leaf(start, revision as u64, &exps, None)?
            .ok_or_else(|| {
                StorageError::illegal(format!("revision root {revision} is unreachable"))
            })?;
        let key = leaf_ref.page_key().ok_or_else(|| {
            StorageError::illegal(format!("revision root {revision} has no persisted page"))
        })?;
        Ok(self.load_page(key)?.as_revision_root()?.clone())
    }

    /// Descends the indirect trie below `start`, consuming `exps[level]`
    /// bits of `key` per level, and returns the leaf reference, or `None`
    /// if the path is not materialized.
    fn dereference_leaf(
        &mut self,
        start: PageReference,
        key: u64,
        exps: &[u8],
        tag: Option<IndexType>,
    ) -> Result<Option<PageReference>> {
        let mut reference = start;
        for offset in crate::page::level_offsets(key, exps) {
            let Some(page_key) = reference.page_key() else {
                return Ok(None);
            };
            let indirect = self.load_page(page_key)?.as_indirect()?;
            let fanout = indirect.fanout() as u64;
            if offset >= fanout {
                return Err(StorageError::UnsupportedKey {
                    key,
                    offset,
                    fanout,
                }
                .into());
            }
            reference = *indirect
                .ref_at(offset as usize)
                .ok_or_else(|| StorageError::illegal("offset passed fanout check"))?;
        }
        if let Some(index_type) = tag {
            reference.set_index_type(index_type);
        }
        Ok(Some(reference))
    }

    /// Collects the chain of historical leaves for `page_key`, newest
    /// first, honoring the revisioning policy's bounds and deduplicating
    /// persisted leaves by page key.
    fn collect_snapshot_leaves(
        &mut self,
        page_key: RecordPageKey,
        index_type: IndexType,
    ) -> Result<Vec<KeyValuePage<S>>> {
        let policy = self.cfg.revision_policy;
        let revs_to_restore = self.cfg.revisions_to_restore.max(1);
        let max_leaves = policy.leaves_to_collect(revs_to_restore);
        let exps = self.uber.page_count_exps(index_type).to_vec();

        let mut refs: Vec<PageReference> = Vec::new();
        let mut seen: HashSet<PageKey> = HashSet::new();

        let mut revision = self.root.revision();
        while revision >= 0 {
            let root = if revision == self.root.revision() {
                self.root.clone()
            } else {
                self.load_revision_root(revision)?
            };
            let start = *root.subtree_root(index_type);
            let leaf_ref = if start.is_null() {
                None
            } else {
                self.dereference_leaf(start, page_key, &exps, Some(index_type))?
            };
            let Some(leaf_ref) = leaf_ref.filter(|r| !r.is_null()) else {
                break;
            };

            match leaf_ref.page_key() {
                Some(persisted) => {
                    if seen.insert(persisted) {
                        refs.push(leaf_ref);
                    }
                }
                None => refs.push(leaf_ref),
            }

            if refs.len() >= max_leaves {
                break;
            }
            if policy == crate::revision::RevisionPolicy::Differential {
                if revision == 0 {
                    break;
                }
                let next = (revision - revs_to_restore as i32 + 1).max(1);
                if next == revision {
                    break;
                }
                revision = next;
            } else {
                revision -= 1;
            }
        }

        let cfg = Arc::clone(&self.cfg);
        let mut leaves = Vec::with_capacity(refs.len());
        for leaf_ref in refs {
            let key = leaf_ref.page_key().ok_or_else(|| {
                StorageError::illegal("snapshot leaf reference has no persisted page")
            })?;
            let bytes = self.reader.read(key)?;
            let page = Page::<S>::deserialize(&mut ByteBuf::from_vec(bytes), &cfg)?;
            leaves.push(page.into_key_value()?);
        }
        Ok(leaves)
    }

    /// Combined container for the write path's full-leaf seeding.
    pub(crate) fn container(
        &mut self,
        page_key: RecordPageKey,
        index_type: IndexType,
    ) -> Result<Container<S>> {
        self.load_container(page_key, index_type)
    }

    /// Decoded copy of a persisted indirect page, for copy-on-write trie
    /// updates.
    pub(crate) fn read_indirect(&mut self, key: PageKey) -> Result<crate::page::IndirectPage> {
        Ok(self.load_page(key)?.as_indirect()?.clone())
    }

    pub(crate) fn name_page_clone(&self) -> NamePage {
        self.name_page.clone()
    }

    /// Materializes the container for `page_key`: staged log state first,
    /// then the combined historical leaves.
    fn load_container(
        &mut self,
        page_key: RecordPageKey,
        index_type: IndexType,
    ) -> Result<Container<S>> {
        let cfg = Arc::clone(&self.cfg);
        let family = index_type.cache_family();
        if let Some(log) = self.family_log_mut(family) {
            if let Some(LogEntry::Page(bytes)) = log.get(page_key)? {
                let page = Page::<S>::deserialize(&mut ByteBuf::from_vec(bytes), &cfg)?;
                return Ok(Container::Complete(page.into_key_value()?));
            }
        }

        let leaves = self.collect_snapshot_leaves(page_key, index_type)?;
        if leaves.is_empty() {
            return Ok(Container::Empty);
        }
        Ok(Container::Complete(cfg.revision_policy.combine(leaves)))
    }
}

impl<S: RecordSerializer, R: PageReader> Drop for PageReadTxn<S, R> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
