//! Bounded pool of fixed-size relay buffers

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Number of idle buffers kept for reuse
pub const DEFAULT_POOL_CAPACITY: usize = 10;
/// Size of each relay buffer
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Pool of reusable byte buffers shared by concurrently open bridges.
///
/// Checkout never blocks: an empty pool allocates a fresh buffer, and a full
/// pool drops returned buffers instead of keeping them.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buffer_size,
        })
    }

    /// Check out a buffer; it goes back to the pool when the guard drops
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn put(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(buf);
        }
    }

    /// Number of buffers currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(DEFAULT_POOL_CAPACITY)),
            capacity: DEFAULT_POOL_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Guard for a checked-out buffer
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
