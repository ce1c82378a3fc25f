//! # Elastic Byte Buffer
//!
//! Growable, reusable byte buffer with a read cursor, used as the carrier
//! for every page encode/decode in StrataDB. Writes append at the tail;
//! reads consume from an independent cursor, so one buffer can be filled
//! once and drained once without copying.
//!
//! ## Encoding Conventions
//!
//! All fixed-width integers written through this type are big-endian; the
//! page formats are defined that way. (The resource file header is the one
//! little-endian structure in the crate and does not pass through here.)
//!
//! ## Reuse
//!
//! `clear` resets both the tail and the cursor but keeps the allocation,
//! which is what the scratch-buffer pool relies on. No method ever shrinks
//! the backing storage.
//!
//! ## Error Handling
//!
//! Read overruns classify as `CorruptPage`: the only way a well-formed
//! caller underruns is page material that lies about its own lengths.

use eyre::Result;

use crate::error::StorageError;

#[derive(Debug, Default, Clone)]
pub struct ByteBuf {
    data: Vec<u8>,
    read_pos: usize,
}

impl ByteBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Wraps existing bytes for reading; the cursor starts at zero.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, read_pos: 0 }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the read cursor and the tail.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Resets tail and cursor, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Little-endian u64, used only by the bitset word encoding.
    pub fn write_u64_le(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.remaining() < len {
            return Err(StorageError::corrupt(format!(
                "byte buffer underrun: need {len} bytes, {} remaining",
                self.remaining()
            ))
            .into());
        }
        let slice = &self.data[self.read_pos..self.read_pos + len];
        self.read_pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap())) // INVARIANT: take returned exactly 4 bytes
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap())) // INVARIANT: take returned exactly 4 bytes
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap())) // INVARIANT: take returned exactly 8 bytes
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap())) // INVARIANT: take returned exactly 8 bytes
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap())) // INVARIANT: take returned exactly 8 bytes
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.take(len)
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }
}
