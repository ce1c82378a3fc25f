//! # Resource Handle
//!
//! A resource is one versioned tree stored in a directory:
//!
//! ```text
//! resource_dir/
//! ├── resource.db          # append-only page store, uber head at offset 0
//! ├── commit.inflight      # present only while a commit is staging
//! └── log/
//!     ├── page.log         # transaction logs, per record kind
//!     ├── node.log
//!     ├── path.log         # only when the path index is enabled
//!     └── value.log        # only when the CAS index is enabled
//! ```
//!
//! Creating a resource bootstraps revision 0 (empty subtrees, empty name
//! dictionary), so a read transaction can always bind to a committed
//! revision. Read transactions each own an exclusive reader over the data
//! file; at most one write transaction exists at a time, enforced with an
//! atomic latch released when the transaction commits, aborts, or drops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use crate::config::constants::{COMMIT_MARKER_FILE_NAME, DATA_FILE_NAME, LOG_DIR_NAME};
use crate::config::ResourceConfig;
use crate::encoding::ByteBuf;
use crate::error::StorageError;
use crate::io::{FileReader, FileWriter, PageReader};
use crate::page::Page;
use crate::records::{RecordSerializer, Revision};
use crate::txn::{PageReadTxn, PageWriteTxn};

pub struct Resource<S: RecordSerializer> {
    dir: PathBuf,
    cfg: Arc<ResourceConfig<S>>,
    write_latch: Arc<AtomicBool>,
}

impl<S: RecordSerializer> Resource<S> {
    /// Creates the resource directory and bootstraps revision 0. Fails if
    /// a resource already exists at `dir`.
    pub fn create(dir: impl AsRef<Path>, cfg: ResourceConfig<S>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(StorageError::from)?;
        let resource = Self {
            dir: dir.clone(),
            cfg: Arc::new(cfg),
            write_latch: Arc::new(AtomicBool::new(false)),
        };
        let writer = FileWriter::create(&resource.data_path())?;

        resource.acquire_latch()?;
        let bootstrap = PageWriteTxn::<S, FileReader, FileWriter>::begin(
            None,
            writer,
            Arc::clone(&resource.cfg),
            resource.marker_path(),
            resource.log_dir(),
            Some(Arc::clone(&resource.write_latch)),
        )?;
        bootstrap.commit(None, None)?;
        debug!(?dir, "created resource");
        Ok(resource)
    }

    /// Opens an existing resource. The configuration must match the one
    /// the resource was created with.
    pub fn open(dir: impl AsRef<Path>, cfg: ResourceConfig<S>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let data_path = dir.join(DATA_FILE_NAME);
        if !data_path.exists() {
            return Err(StorageError::illegal(format!(
                "no resource at {}",
                dir.display()
            ))
            .into());
        }
        Ok(Self {
            dir,
            cfg: Arc::new(cfg),
            write_latch: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ResourceConfig<S> {
        &self.cfg
    }

    /// Latest committed revision number.
    pub fn latest_revision(&self) -> Result<Revision> {
        let mut reader = FileReader::open(&self.data_path())?;
        let key = reader
            .uber_head()?
            .ok_or_else(|| StorageError::illegal("resource has no committed revision"))?;
        let mut bytes = ByteBuf::from_vec(reader.read(key)?);
        match Page::<S>::deserialize(&mut bytes, &self.cfg)? {
            Page::Uber(uber) => Ok(uber.latest_revision()),
            other => Err(StorageError::corrupt(format!(
                "uber head points at a {:?} page",
                other.kind()
            ))
            .into()),
        }
    }

    /// Opens a read transaction bound to `revision`.
    pub fn begin_read(&self, revision: Revision) -> Result<PageReadTxn<S, FileReader>> {
        let reader = FileReader::open(&self.data_path())?;
        let log_dir = self.marker_path().exists().then(|| self.log_dir());
        PageReadTxn::open(reader, Arc::clone(&self.cfg), revision, log_dir)
    }

    /// Opens a read transaction bound to the latest committed revision.
    pub fn begin_read_latest(&self) -> Result<PageReadTxn<S, FileReader>> {
        self.begin_read(self.latest_revision()?)
    }

    /// Opens the single write transaction, staging the next revision on
    /// top of the latest committed one.
    pub fn begin_write(&self) -> Result<PageWriteTxn<S, FileReader, FileWriter>> {
        self.acquire_latch()?;
        let result = (|| {
            let prev = self.begin_read(self.latest_revision()?)?;
            let writer = FileWriter::open(&self.data_path())?;
            PageWriteTxn::begin(
                Some(prev),
                writer,
                Arc::clone(&self.cfg),
                self.marker_path(),
                self.log_dir(),
                Some(Arc::clone(&self.write_latch)),
            )
        })();
        if result.is_err() {
            self.write_latch.store(false, Ordering::Release);
        }
        result
    }

    fn acquire_latch(&self) -> Result<()> {
        self.write_latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StorageError::illegal("another write transaction is active"))?;
        Ok(())
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE_NAME)
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(COMMIT_MARKER_FILE_NAME)
    }

    fn log_dir(&self) -> PathBuf {
        self.dir.join(LOG_DIR_NAME)
    }
}

impl<S: RecordSerializer> std::fmt::Debug for Resource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("dir", &self.dir).finish()
    }
}
