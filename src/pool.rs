//! Reusable staging-buffer pool.
//!
//! Buffers are exclusive to their borrower for the lifetime of the guard and
//! return to the pool on drop, so release happens on every exit path.

use crate::buffer::FixedBuffer;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Upper bound on buffers kept around for reuse.
const MAX_IDLE: usize = 64;

/// Pool of [`FixedBuffer`]s sharing one capacity.
pub struct BufferPool {
    buffer_capacity: usize,
    idle: Mutex<Vec<FixedBuffer>>,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a cleared buffer, creating one if the pool is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let buffer = reused.unwrap_or_else(|| FixedBuffer::with_capacity(self.buffer_capacity));
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    fn release(&self, mut buffer: FixedBuffer) {
        buffer.clear();
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE {
            idle.push(buffer);
        }
    }
}

/// Exclusive borrow of a pooled buffer; returns to the pool when dropped.
pub struct PooledBuffer {
    buffer: Option<FixedBuffer>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = FixedBuffer;

    fn deref(&self) -> &FixedBuffer {
        self.buffer.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut FixedBuffer {
        self.buffer.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
