//! # Scratch Buffer Pool
//!
//! Pre-allocated pool of elastic byte buffers for page encode/decode work.
//!
//! ## Purpose
//!
//! Every leaf serialization, record persist, and overflow materialization
//! needs a scratch buffer. Acquiring them from a shared pool keeps the hot
//! paths allocation-free after warmup, and the RAII guard guarantees the
//! buffer is cleared and returned on every exit path, including early
//! returns through `?`.
//!
//! ## Usage
//!
//! ```ignore
//! let pool = BufferPool::new(8);
//!
//! let mut scratch = pool.acquire();
//! serializer.serialize(&mut scratch, &record)?;
//! let data = scratch.as_slice().to_vec();
//! // scratch is cleared and returned to the pool on drop
//! ```
//!
//! ## Design
//!
//! `PooledBuf` uses `ManuallyDrop` instead of `Option` to make invalid
//! states unrepresentable; the pool itself is a single mutex-guarded stack.
//! Transactions are single-threaded, so contention on the pool is limited
//! to the handful of transactions a process runs concurrently.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::encoding::ByteBuf;

/// Buffers returned to a fuller pool than this are dropped instead.
const MAX_POOLED: usize = 64;

/// Initial capacity of a freshly allocated scratch buffer.
const INITIAL_BUF_CAPACITY: usize = 4096;

pub struct BufferPool {
    inner: Arc<Mutex<Vec<ByteBuf>>>,
}

impl BufferPool {
    /// Creates a pool with `initial_capacity` pre-allocated buffers.
    pub fn new(initial_capacity: usize) -> Self {
        let buffers = (0..initial_capacity.min(MAX_POOLED))
            .map(|_| ByteBuf::with_capacity(INITIAL_BUF_CAPACITY))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(buffers)),
        }
    }

    /// Acquires a cleared buffer, allocating if the pool is empty. The
    /// buffer returns to the pool when the guard drops.
    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .inner
            .lock()
            .pop()
            .unwrap_or_else(|| ByteBuf::with_capacity(INITIAL_BUF_CAPACITY));
        PooledBuf {
            buf: ManuallyDrop::new(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn available(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .finish()
    }
}

/// A scratch buffer that clears itself and returns to its pool when dropped.
pub struct PooledBuf {
    buf: ManuallyDrop<ByteBuf>,
    pool: Arc<Mutex<Vec<ByteBuf>>>,
}

impl Deref for PooledBuf {
    type Target = ByteBuf;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        // SAFETY: drop runs exactly once; the buffer is valid until here and
        // never touched through self again after being taken.
        let mut buf = unsafe { ManuallyDrop::take(&mut self.buf) };
        buf.clear();
        let mut pool = self.pool.lock();
        if pool.len() < MAX_POOLED {
            pool.push(buf);
        }
    }
}
