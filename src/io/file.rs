//! # Resource File Backend
//!
//! One append-only file per resource. A fixed little-endian header sits at
//! offset 0 and carries the uber head pointer; everything after it is a
//! sequence of checksummed page blocks. A page key is the byte offset of
//! its block.
//!
//! ## File Layout
//!
//! ```text
//! +--------------------+
//! | Header (64 B)      |  magic, version, flags, uber_head
//! +--------------------+
//! | Block              |  u32 len | u32 crc32 | bytes
//! +--------------------+
//! | Block              |
//! +--------------------+
//! | ...                |
//! ```
//!
//! ## Durability Protocol
//!
//! Commits append every new block, `sync`, then flip `uber_head` in place
//! and `sync` again. A crash between the two syncs leaves the old head
//! intact and the half-written revision unreachable, which the append-only
//! layout tolerates by design.
//!
//! ## Read Path
//!
//! Readers map the file once at open (`memmap2`) and never observe blocks
//! appended afterwards; a read transaction is bound to a revision whose
//! blocks all precede its own mapping.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crc::{Crc, CRC_32_ISCSI};
use eyre::{Result, WrapErr};
use memmap2::Mmap;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageReader, PageWriter};
use crate::config::constants::NULL_ID;
use crate::error::StorageError;
use crate::records::PageKey;

pub const RESOURCE_MAGIC: &[u8; 16] = b"StrataDB Res v1\x00";
pub const RESOURCE_FILE_HEADER_SIZE: usize = 64;
pub const CURRENT_VERSION: u32 = 1;

const BLOCK_HEADER_SIZE: usize = 8;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ResourceFileHeader {
    magic: [u8; 16],
    version: U32,
    flags: U32,
    uber_head: U64,
    reserved: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<ResourceFileHeader>() == RESOURCE_FILE_HEADER_SIZE);

/// Byte offset of the `uber_head` field inside the header.
const UBER_HEAD_OFFSET: u64 = 24;

impl ResourceFileHeader {
    pub fn new() -> Self {
        Self {
            magic: *RESOURCE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            flags: U32::new(0),
            uber_head: U64::new(NULL_ID),
            reserved: [0u8; 32],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < RESOURCE_FILE_HEADER_SIZE {
            return Err(StorageError::corrupt(format!(
                "resource file too small for header: {} < {}",
                bytes.len(),
                RESOURCE_FILE_HEADER_SIZE
            ))
            .into());
        }
        let header = Self::ref_from_bytes(&bytes[..RESOURCE_FILE_HEADER_SIZE])
            .map_err(|e| StorageError::corrupt(format!("unreadable resource header: {e:?}")))?;
        if &header.magic != RESOURCE_MAGIC {
            return Err(StorageError::corrupt("invalid resource file magic").into());
        }
        if header.version.get() != CURRENT_VERSION {
            return Err(StorageError::corrupt(format!(
                "unsupported resource version {} (expected {})",
                header.version.get(),
                CURRENT_VERSION
            ))
            .into());
        }
        Ok(header)
    }

    pub fn uber_head(&self) -> Option<PageKey> {
        match self.uber_head.get() {
            NULL_ID => None,
            key => Some(key),
        }
    }
}

impl Default for ResourceFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------

/// Memory-mapped reader over one resource file, exclusively owned by a
/// single transaction.
pub struct FileReader {
    mmap: Option<Mmap>,
}

impl FileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(StorageError::from)
            .wrap_err_with(|| format!("failed to open resource file {path:?}"))?;
        // SAFETY: the file is append-only; existing bytes are never
        // rewritten except the 64-byte header, which is re-read on demand
        // and never borrowed across writes.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(StorageError::from)
            .wrap_err("failed to map resource file")?;
        ResourceFileHeader::from_bytes(&mmap)?;
        Ok(Self { mmap: Some(mmap) })
    }

    fn mapped(&self) -> Result<&Mmap> {
        self.mmap
            .as_ref()
            .ok_or_else(|| StorageError::illegal("page reader already closed").into())
    }
}

impl PageReader for FileReader {
    fn read(&mut self, key: PageKey) -> Result<Vec<u8>> {
        let mmap = self.mapped()?;
        let offset = key as usize;
        let header_end = offset.checked_add(BLOCK_HEADER_SIZE);
        if offset < RESOURCE_FILE_HEADER_SIZE || header_end.map_or(true, |end| end > mmap.len()) {
            return Err(
                StorageError::corrupt(format!("page key {key} outside the data file")).into(),
            );
        }
        let len = u32::from_be_bytes(mmap[offset..offset + 4].try_into().unwrap()) as usize; // INVARIANT: bounds checked above
        let stored_crc = u32::from_be_bytes(mmap[offset + 4..offset + 8].try_into().unwrap());
        let data_start = offset + BLOCK_HEADER_SIZE;
        if data_start
            .checked_add(len)
            .map_or(true, |end| end > mmap.len())
        {
            return Err(StorageError::corrupt(format!(
                "page block at {key} overruns the data file ({len} bytes)"
            ))
            .into());
        }
        let data = &mmap[data_start..data_start + len];
        let computed = CRC32.checksum(data);
        if computed != stored_crc {
            return Err(StorageError::corrupt(format!(
                "page block at {key} fails checksum: stored {stored_crc:#010x}, computed {computed:#010x}"
            ))
            .into());
        }
        Ok(data.to_vec())
    }

    fn uber_head(&mut self) -> Result<Option<PageKey>> {
        let mmap = self.mapped()?;
        Ok(ResourceFileHeader::from_bytes(mmap)?.uber_head())
    }

    fn close(&mut self) -> Result<()> {
        self.mmap = None;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------

/// Appending writer over one resource file.
pub struct FileWriter {
    file: File,
    end_offset: u64,
}

impl FileWriter {
    /// Creates a fresh resource file with an empty header. Fails if the
    /// file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(StorageError::from)
            .wrap_err_with(|| format!("failed to create resource file {path:?}"))?;
        let header = ResourceFileHeader::new();
        file.write_all(header.as_bytes()).map_err(StorageError::from)?;
        file.sync_all().map_err(StorageError::from)?;
        Ok(Self {
            file,
            end_offset: RESOURCE_FILE_HEADER_SIZE as u64,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(StorageError::from)
            .wrap_err_with(|| format!("failed to open resource file {path:?}"))?;
        let end_offset = file.seek(SeekFrom::End(0)).map_err(StorageError::from)?;
        if end_offset < RESOURCE_FILE_HEADER_SIZE as u64 {
            return Err(StorageError::corrupt("resource file shorter than its header").into());
        }
        Ok(Self { file, end_offset })
    }
}

impl PageWriter for FileWriter {
    fn append(&mut self, bytes: &[u8]) -> Result<PageKey> {
        let key = self.end_offset;
        self.file
            .seek(SeekFrom::Start(self.end_offset))
            .map_err(StorageError::from)?;
        self.file
            .write_all(&(bytes.len() as u32).to_be_bytes())
            .map_err(StorageError::from)?;
        self.file
            .write_all(&CRC32.checksum(bytes).to_be_bytes())
            .map_err(StorageError::from)?;
        self.file.write_all(bytes).map_err(StorageError::from)?;
        self.end_offset += (BLOCK_HEADER_SIZE + bytes.len()) as u64;
        Ok(key)
    }

    fn set_uber_head(&mut self, key: PageKey) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(UBER_HEAD_OFFSET))
            .map_err(StorageError::from)?;
        self.file
            .write_all(&key.to_le_bytes())
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(StorageError::from)?;
        Ok(())
    }
}
