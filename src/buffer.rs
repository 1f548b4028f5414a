//! Fixed-capacity staging buffer for rewritten header blocks.
//!
//! The buffer never reallocates. Writes that would exceed the capacity fail
//! with [`ShortBuffer`] and leave the already-written content untouched, so
//! the caller decides whether to reset and bail out.

use thiserror::Error;

/// Write exceeded the buffer capacity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("short buffer: capacity {capacity} exceeded")]
pub struct ShortBuffer {
    pub capacity: usize,
}

/// Append-only byte buffer with a capacity fixed at construction.
pub struct FixedBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl FixedBuffer {
    /// Create a buffer that can hold up to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `bytes`, failing without a partial write when they do not fit.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, ShortBuffer> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(ShortBuffer {
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(bytes.len())
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop the content, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl std::fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_within_capacity() {
        let mut buf = FixedBuffer::with_capacity(10);
        assert_eq!(buf.write(b"123456").unwrap(), 6);
        assert_eq!(buf.as_slice(), b"123456");
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_write_past_capacity_is_short_buffer() {
        let mut buf = FixedBuffer::with_capacity(5);
        let err = buf.write(b"12345678").unwrap_err();
        assert_eq!(err, ShortBuffer { capacity: 5 });
        // A failed write must not leave partial content behind
        assert!(buf.is_empty());
    }

    #[test]
    fn test_exact_fit_then_overflow() {
        let mut buf = FixedBuffer::with_capacity(5);
        buf.write(b"12345").unwrap();
        assert!(buf.write(b"6").is_err());
        assert_eq!(buf.as_slice(), b"12345");
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = FixedBuffer::with_capacity(8);
        buf.write(b"abcdef").unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 8);
        buf.write(b"12345678").unwrap();
    }
}
