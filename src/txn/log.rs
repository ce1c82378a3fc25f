//! # Transaction Log
//!
//! On-disk staging cache for uncommitted pages, one log per record kind
//! (`page`, `node`, `path`, `value`). A write transaction stages every
//! dirty page here before anything reaches the resource file; a read
//! transaction opened while a commit is in flight (the marker file exists)
//! consults the logs before the persistent store, so it observes staged
//! state at full fidelity.
//!
//! ## Entry Format
//!
//! ```text
//! u64 page_key
//! u8  tag            (0 = empty sentinel, 1 = serialized page)
//! u32 len
//! bytes              (serialized page; absent for the sentinel)
//! ```
//!
//! The file is append-only; re-putting a key appends a new entry and the
//! in-memory index keeps only the latest offset (last write wins). Opening
//! an existing log replays it to rebuild the index. `clear` truncates;
//! `remove` deletes the file — entries are consumed at commit or abort,
//! never reused across commits.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;

use crate::error::StorageError;
use crate::records::PageKey;

const TAG_EMPTY: u8 = 0;
const TAG_PAGE: u8 = 1;
const ENTRY_HEADER_SIZE: u64 = 8 + 1 + 4;

/// Record kinds with a dedicated staging log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Page,
    Node,
    Path,
    Value,
}

impl LogKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LogKind::Page => "page.log",
            LogKind::Node => "node.log",
            LogKind::Path => "path.log",
            LogKind::Value => "value.log",
        }
    }
}

/// A staged value: either a full serialized page or the explicit "known
/// absent" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Empty,
    Page(Vec<u8>),
}

pub struct TransactionLog {
    file: File,
    path: PathBuf,
    index: HashMap<PageKey, (u64, u32, u8)>,
    end_offset: u64,
}

impl TransactionLog {
    /// Opens (or creates) the log for `kind` under `dir`, replaying any
    /// existing entries left by an in-flight commit.
    pub fn open(dir: &Path, kind: LogKind) -> Result<Self> {
        let path = dir.join(kind.file_name());
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(StorageError::from)
            .wrap_err_with(|| format!("failed to open transaction log {path:?}"))?;

        let mut index = HashMap::new();
        let file_len = file.seek(SeekFrom::End(0)).map_err(StorageError::from)?;
        file.seek(SeekFrom::Start(0)).map_err(StorageError::from)?;

        let mut offset = 0u64;
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        while offset + ENTRY_HEADER_SIZE <= file_len {
            file.read_exact(&mut header).map_err(StorageError::from)?;
            let key = u64::from_be_bytes(header[0..8].try_into().unwrap()); // INVARIANT: header is 13 bytes
            let tag = header[8];
            let len = u32::from_be_bytes(header[9..13].try_into().unwrap());
            if tag != TAG_EMPTY && tag != TAG_PAGE {
                return Err(StorageError::corrupt(format!(
                    "transaction log entry at {offset} has invalid tag {tag}"
                ))
                .into());
            }
            let next = offset + ENTRY_HEADER_SIZE + len as u64;
            if next > file_len {
                return Err(StorageError::corrupt(format!(
                    "transaction log entry at {offset} overruns the file"
                ))
                .into());
            }
            index.insert(key, (offset, len, tag));
            file.seek(SeekFrom::Start(next)).map_err(StorageError::from)?;
            offset = next;
        }
        if offset != file_len {
            return Err(StorageError::corrupt("transaction log has a truncated tail").into());
        }

        Ok(Self {
            file,
            path,
            index,
            end_offset: file_len,
        })
    }

    pub fn get(&mut self, key: PageKey) -> Result<Option<LogEntry>> {
        let Some(&(offset, len, tag)) = self.index.get(&key) else {
            return Ok(None);
        };
        if tag == TAG_EMPTY {
            return Ok(Some(LogEntry::Empty));
        }
        self.file
            .seek(SeekFrom::Start(offset + ENTRY_HEADER_SIZE))
            .map_err(StorageError::from)?;
        let mut data = vec![0u8; len as usize];
        self.file.read_exact(&mut data).map_err(StorageError::from)?;
        Ok(Some(LogEntry::Page(data)))
    }

    pub fn put(&mut self, key: PageKey, entry: &LogEntry) -> Result<()> {
        let (tag, data): (u8, &[u8]) = match entry {
            LogEntry::Empty => (TAG_EMPTY, &[]),
            LogEntry::Page(data) => (TAG_PAGE, data),
        };
        self.file
            .seek(SeekFrom::Start(self.end_offset))
            .map_err(StorageError::from)?;
        self.file
            .write_all(&key.to_be_bytes())
            .map_err(StorageError::from)?;
        self.file.write_all(&[tag]).map_err(StorageError::from)?;
        self.file
            .write_all(&(data.len() as u32).to_be_bytes())
            .map_err(StorageError::from)?;
        self.file.write_all(data).map_err(StorageError::from)?;
        self.index
            .insert(key, (self.end_offset, data.len() as u32, tag));
        self.end_offset += ENTRY_HEADER_SIZE + data.len() as u64;
        Ok(())
    }

    pub fn put_all<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (PageKey, LogEntry)>,
    {
        for (key, entry) in entries {
            self.put(key, &entry)?;
        }
        Ok(())
    }

    /// Keys currently staged, in ascending order.
    pub fn keys(&self) -> Vec<PageKey> {
        let mut keys: Vec<PageKey> = self.index.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drops every staged entry but keeps the log itself.
    pub fn clear(&mut self) -> Result<()> {
        self.file.set_len(0).map_err(StorageError::from)?;
        self.index.clear();
        self.end_offset = 0;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(StorageError::from)?;
        Ok(())
    }

    pub fn close(self) {
        drop(self.file);
    }

    /// Consumes the log and deletes its file.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::remove_file(&path)
            .map_err(StorageError::from)
            .wrap_err_with(|| format!("failed to remove transaction log {path:?}"))?;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLog")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let mut log = TransactionLog::open(dir.path(), LogKind::Node).unwrap();

        log.put(3, &LogEntry::Page(b"leaf bytes".to_vec())).unwrap();
        log.put(9, &LogEntry::Empty).unwrap();

        assert_eq!(
            log.get(3).unwrap(),
            Some(LogEntry::Page(b"leaf bytes".to_vec()))
        );
        assert_eq!(log.get(9).unwrap(), Some(LogEntry::Empty));
        assert_eq!(log.get(4).unwrap(), None);
        assert_eq!(log.keys(), vec![3, 9]);
    }

    #[test]
    fn last_write_wins() {
        let dir = tempdir().unwrap();
        let mut log = TransactionLog::open(dir.path(), LogKind::Page).unwrap();

        log.put(1, &LogEntry::Page(b"old".to_vec())).unwrap();
        log.put(1, &LogEntry::Page(b"new".to_vec())).unwrap();

        assert_eq!(log.get(1).unwrap(), Some(LogEntry::Page(b"new".to_vec())));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn reopen_replays_existing_entries() {
        let dir = tempdir().unwrap();
        {
            let mut log = TransactionLog::open(dir.path(), LogKind::Value).unwrap();
            log.put(7, &LogEntry::Page(b"staged".to_vec())).unwrap();
            log.put(8, &LogEntry::Empty).unwrap();
            log.sync().unwrap();
            log.close();
        }

        let mut log = TransactionLog::open(dir.path(), LogKind::Value).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(7).unwrap(), Some(LogEntry::Page(b"staged".to_vec())));
    }

    #[test]
    fn clear_truncates() {
        let dir = tempdir().unwrap();
        let mut log = TransactionLog::open(dir.path(), LogKind::Path).unwrap();
        log.put(1, &LogEntry::Page(vec![1, 2, 3])).unwrap();

        log.clear().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.get(1).unwrap(), None);
        assert_eq!(
            std::fs::metadata(dir.path().join(LogKind::Path.file_name()))
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn remove_deletes_the_file() {
        let dir = tempdir().unwrap();
        let mut log = TransactionLog::open(dir.path(), LogKind::Node).unwrap();
        log.put(1, &LogEntry::Empty).unwrap();

        log.remove().unwrap();
        assert!(!dir.path().join(LogKind::Node.file_name()).exists());
    }

    #[test]
    fn truncated_tail_rejected_on_replay() {
        let dir = tempdir().unwrap();
        {
            let mut log = TransactionLog::open(dir.path(), LogKind::Node).unwrap();
            log.put(1, &LogEntry::Page(vec![9; 100])).unwrap();
            log.sync().unwrap();
            log.close();
        }
        let path = dir.path().join(LogKind::Node.file_name());
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        drop(file);

        assert!(TransactionLog::open(dir.path(), LogKind::Node).is_err());
    }
}
