//! Pooled scratch buffers for alignment padding
//!
//! Buffers are rented as [`PooledBuffer`] guards and go back to the pool when
//! the guard drops, on every exit path.

use crate::limits::{validate_allocation_size, MAX_POOLED_BUFFERS, MAX_SCRATCH_SIZE};
use crate::Result;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
}

impl PoolInner {
    fn take(&self, size: usize) -> Vec<u8> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        let candidate = free
            .iter()
            .enumerate()
            .filter(|(_, buf)| buf.capacity() >= size)
            .min_by_key(|(_, buf)| buf.capacity())
            .map(|(idx, _)| idx);

        match candidate {
            Some(idx) => free.swap_remove(idx),
            None => free.pop().unwrap_or_default(),
        }
    }

    fn give_back(&self, buf: Vec<u8>) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

/// A shared pool of reusable byte buffers
///
/// Cloning a pool is cheap and clones share the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool that keeps at most `max_retained` idle buffers
    pub fn new(max_retained: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_retained,
            }),
        }
    }

    /// The process-wide pool used when no pool is configured
    pub fn shared() -> Self {
        static SHARED: OnceLock<BufferPool> = OnceLock::new();
        SHARED
            .get_or_init(|| BufferPool::new(MAX_POOLED_BUFFERS))
            .clone()
    }

    /// Rent a zero-filled buffer of exactly `size` bytes
    ///
    /// # Errors
    ///
    /// Returns an error if `size` exceeds [`MAX_SCRATCH_SIZE`]
    pub fn rent(&self, size: usize) -> Result<PooledBuffer> {
        validate_allocation_size(size as u64, MAX_SCRATCH_SIZE, "Scratch buffer")?;

        let mut buf = self.inner.take(size);
        buf.clear();
        buf.resize(size, 0);

        Ok(PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of idle buffers currently held
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::shared()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("max_retained", &self.inner.max_retained)
            .finish()
    }
}

/// A rented buffer; returned to its pool on drop
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
