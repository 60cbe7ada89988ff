//! Fixed-capacity byte buffer for request and response payloads.

use std::io;

use crate::core::error::CapacityExceeded;

/// A byte buffer whose capacity is fixed at construction.
///
/// Writes that would exceed the capacity fail with [`CapacityExceeded`] and
/// leave the buffer untouched. The buffer never reallocates.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl BoundedBuffer {
    /// Allocate a buffer holding at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Maximum number of bytes this buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes currently written.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The written bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Append `data`, or fail without mutating anything if it does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when `data.len() > self.remaining()`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CapacityExceeded> {
        let available = self.remaining();
        if data.len() > available {
            return Err(CapacityExceeded {
                requested: data.len(),
                available,
            });
        }
        let end = self.len + data.len();
        self.bytes[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    /// Drop the written bytes, keeping the backing storage.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Streaming adapter over this buffer.
    pub fn writer(&mut self) -> BufferWriter<'_> {
        BufferWriter { buffer: self }
    }
}

/// `io::Write` adapter for a [`BoundedBuffer`].
///
/// Every `write` is all-or-nothing. An overflow surfaces as an `io::Error`
/// wrapping [`CapacityExceeded`], which `TaskError::from` recognises.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut BoundedBuffer,
}

impl io::Write for BufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.buffer.write(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskError;
    use std::io::Write;

    #[test]
    fn write_within_capacity() {
        let mut buf = BoundedBuffer::new(8);
        buf.write(b"hello").unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.remaining(), 3);
        assert_eq!(buf.as_bytes(), b"hello");
    }

    #[test]
    fn overflowing_write_leaves_length_unchanged() {
        let mut buf = BoundedBuffer::new(8);
        buf.write(b"hello").unwrap();

        let err = buf.write(b"abcd").unwrap_err();
        assert_eq!(
            err,
            CapacityExceeded {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_bytes(), b"hello");
    }

    #[test]
    fn exact_fill_succeeds() {
        let mut buf = BoundedBuffer::new(4);
        buf.write(b"ab").unwrap();
        buf.write(b"cd").unwrap();
        assert_eq!(buf.remaining(), 0);
        assert!(buf.write(b"").is_ok());
        assert!(buf.write(b"e").is_err());
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = BoundedBuffer::new(4);
        buf.write(b"abcd").unwrap();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
        buf.write(b"wxyz").unwrap();
        assert_eq!(buf.as_bytes(), b"wxyz");
    }

    #[test]
    fn writer_overflow_converts_to_task_overflow() {
        let mut buf = BoundedBuffer::new(3);
        let err = write!(buf.writer(), "{}", "four").unwrap_err();
        assert!(matches!(TaskError::from(err), TaskError::Overflow(_)));
        assert!(buf.is_empty());
    }
}
