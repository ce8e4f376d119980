//! # Buffer Pool Module
//!
//! A process-wide free list of reusable byte buffers used to capture function
//! output before it is relayed to the client.
//!
//! ## Discipline
//!
//! - [`BufferPool::acquire`] hands out a [`PooledBuffer`] that is always empty
//! - the guard returns its buffer in `Drop`, so every checkout is released
//!   exactly once whatever exit path the caller takes
//! - a guard is moved, never cloned, so two in-flight calls can never share a buffer
//!
//! ## Configuration
//!
//! - `FNR_BUFFER_POOL_MAX_IDLE`: buffers kept on the free list (default: 64)
//! - `FNR_BUFFER_MAX_RETAINED_BYTES`: larger buffers are dropped instead of
//!   being pooled (default: 1 MiB)

use parking_lot::Mutex;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Configuration for a buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of idle buffers kept for reuse
    pub max_idle: usize,
    /// Buffers whose capacity grew beyond this are not returned to the free list
    pub max_retained_bytes: usize,
}

impl BufferPoolConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_idle = std::env::var("FNR_BUFFER_POOL_MAX_IDLE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_idle);
        let max_retained_bytes = std::env::var("FNR_BUFFER_MAX_RETAINED_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retained_bytes);
        Self {
            max_idle,
            max_retained_bytes,
        }
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            max_retained_bytes: 1024 * 1024,
        }
    }
}

/// Counters for a buffer pool
///
/// `outstanding` is the number of buffers currently checked out; it returns to
/// zero once every guard has been dropped.
#[derive(Debug, Default)]
pub struct BufferPoolMetrics {
    acquired: AtomicU64,
    released: AtomicU64,
    allocated: AtomicU64,
    discarded: AtomicU64,
    outstanding: AtomicUsize,
}

impl BufferPoolMetrics {
    /// Total checkouts
    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total returns
    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Checkouts that had to allocate a fresh buffer
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Returns that dropped the buffer instead of pooling it
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Buffers currently checked out
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Thread-safe pool of byte buffers
///
/// Callers never lock anything themselves; the free list is guarded internally.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    config: BufferPoolConfig,
    metrics: BufferPoolMetrics,
}

impl BufferPool {
    /// Create a pool with the given configuration
    #[must_use]
    pub fn new(config: BufferPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(config.max_idle)),
            config,
            metrics: BufferPoolMetrics::default(),
        })
    }

    /// Check out an empty buffer
    ///
    /// The buffer goes back to this pool when the returned guard is dropped.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self.free.lock().pop();
        let mut buf = match reused {
            Some(buf) => buf,
            None => {
                self.metrics.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        };
        buf.clear();

        self.metrics.acquired.fetch_add(1, Ordering::Relaxed);
        self.metrics.outstanding.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            buf,
            pool: Some(Arc::clone(self)),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.metrics.released.fetch_add(1, Ordering::Relaxed);
        self.metrics.outstanding.fetch_sub(1, Ordering::AcqRel);

        if buf.capacity() > self.config.max_retained_bytes {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(capacity = buf.capacity(), "Dropping oversized buffer");
            return;
        }

        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.config.max_idle {
            free.push(buf);
        } else {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of buffers sitting on the free list
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Pool counters
    #[must_use]
    pub fn metrics(&self) -> &BufferPoolMetrics {
        &self.metrics
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }
}

/// A checked-out buffer; returns itself to its pool on drop
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// A buffer that belongs to no pool (dropped normally)
    #[must_use]
    pub fn unpooled() -> Self {
        Self {
            buf: Vec::new(),
            pool: None,
        }
    }

    /// Whether this buffer will be returned to a pool
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl io::Write for PooledBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}
