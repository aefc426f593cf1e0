//! Bounds-checked output buffer with a seek cursor.
//!
//! The buffer has a fixed maximum capacity decided up front. Backing storage
//! grows lazily as bytes are written; bytes never written read back as
//! [`PAD_BYTE`]. Every component writes through one `Buffer` owned by the
//! generator for the duration of a build.

use thiserror::Error;

/// Byte used for gaps, padding and unwritten regions.
pub const PAD_BYTE: u8 = 0x00;

/// A rejected buffer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Seek target lies beyond the capacity.
    #[error("seek to {position:#x} beyond buffer capacity {capacity:#x}")]
    SeekOutOfBounds {
        /// Requested position.
        position: usize,
        /// Buffer capacity.
        capacity: usize,
    },
    /// A write would run past the capacity.
    #[error("write of {len} bytes at {position:#x} exceeds buffer capacity {capacity:#x}")]
    WriteOutOfBounds {
        /// Start of the write.
        position: usize,
        /// Number of bytes requested.
        len: usize,
        /// Buffer capacity.
        capacity: usize,
    },
    /// A read would run past the capacity.
    #[error("read of {len} bytes at {position:#x} exceeds buffer capacity {capacity:#x}")]
    ReadOutOfBounds {
        /// Start of the read.
        position: usize,
        /// Number of bytes requested.
        len: usize,
        /// Buffer capacity.
        capacity: usize,
    },
}

/// Fixed-capacity byte region with a cursor.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    capacity: usize,
    position: usize,
    /// Furthest position reached by a write or a reserving seek.
    high_water: usize,
}

impl Buffer {
    /// Creates an empty buffer that may hold up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            position: 0,
            high_water: 0,
        }
    }

    /// Maximum number of bytes this buffer may hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Length of the content written or reserved so far.
    pub fn len(&self) -> usize {
        self.high_water
    }

    /// Returns `true` if nothing has been written or reserved.
    pub fn is_empty(&self) -> bool {
        self.high_water == 0
    }

    /// Moves the cursor without writing.
    pub fn seek(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.capacity {
            return Err(BufferError::SeekOutOfBounds {
                position,
                capacity: self.capacity,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Moves the cursor forward past a reserved region, marking it as content.
    pub fn reserve_to(&mut self, position: usize) -> Result<(), BufferError> {
        self.seek(position)?;
        self.high_water = self.high_water.max(position);
        Ok(())
    }

    /// Advances the cursor by `len` bytes without writing or reserving.
    pub fn skip(&mut self, len: usize) -> Result<(), BufferError> {
        let target = self.position.saturating_add(len);
        self.seek(target)
    }

    /// Writes `bytes` at the cursor and advances it.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.write_at(self.position, bytes)?;
        self.position += bytes.len();
        Ok(())
    }

    /// Writes `bytes` at `position` without moving the cursor.
    pub fn write_at(&mut self, position: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let end = position
            .checked_add(bytes.len())
            .filter(|end| *end <= self.capacity)
            .ok_or(BufferError::WriteOutOfBounds {
                position,
                len: bytes.len(),
                capacity: self.capacity,
            })?;
        if self.data.len() < end {
            self.data.resize(end, PAD_BYTE);
        }
        self.data[position..end].copy_from_slice(bytes);
        self.high_water = self.high_water.max(end);
        Ok(())
    }

    /// Reads `len` bytes at the cursor and advances it.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, BufferError> {
        let bytes = self.read_at(self.position, len)?;
        self.position += len;
        Ok(bytes)
    }

    /// Reads `len` bytes at `position` without moving the cursor.
    pub fn read_at(&self, position: usize, len: usize) -> Result<Vec<u8>, BufferError> {
        let end = position
            .checked_add(len)
            .filter(|end| *end <= self.capacity)
            .ok_or(BufferError::ReadOutOfBounds {
                position,
                len,
                capacity: self.capacity,
            })?;
        let mut out = vec![PAD_BYTE; len];
        let stored_end = end.min(self.data.len());
        if position < stored_end {
            out[..stored_end - position].copy_from_slice(&self.data[position..stored_end]);
        }
        Ok(out)
    }

    /// Truncates the buffer to the content written or reserved so far.
    pub fn shrink(&mut self) {
        self.data.resize(self.high_water, PAD_BYTE);
        self.capacity = self.high_water;
        self.position = self.position.min(self.high_water);
    }

    /// Returns the stored bytes up to the high-water mark.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.data.len().min(self.high_water)]
    }

    /// Consumes the buffer, returning the content up to the high-water mark.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.resize(self.high_water, PAD_BYTE);
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_advances_cursor() {
        let mut buf = Buffer::new(16);
        buf.write(&[1, 2, 3]).unwrap();
        assert_eq!(buf.position(), 3);
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn unwritten_gap_reads_as_pad() {
        let mut buf = Buffer::new(16);
        buf.write_at(4, &[0xAA]).unwrap();
        assert_eq!(buf.read_at(0, 5).unwrap(), vec![0, 0, 0, 0, 0xAA]);
        // Past the stored data but inside capacity.
        assert_eq!(buf.read_at(8, 2).unwrap(), vec![PAD_BYTE, PAD_BYTE]);
    }

    #[test]
    fn write_past_capacity_is_rejected() {
        let mut buf = Buffer::new(4);
        buf.seek(2).unwrap();
        let err = buf.write(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            BufferError::WriteOutOfBounds { position: 2, len: 3, capacity: 4 }
        );
        assert_eq!(err.to_string(), "write of 3 bytes at 0x2 exceeds buffer capacity 0x4");
        // Nothing was written.
        assert!(buf.is_empty());
    }

    #[test]
    fn seek_past_capacity_is_rejected() {
        let mut buf = Buffer::new(4);
        assert!(buf.seek(4).is_ok());
        assert!(matches!(buf.seek(5), Err(BufferError::SeekOutOfBounds { .. })));
    }

    #[test]
    fn shrink_keeps_reserved_tail() {
        let mut buf = Buffer::new(64);
        buf.write(&[7, 7]).unwrap();
        buf.reserve_to(8).unwrap();
        buf.shrink();
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.into_bytes(), vec![7, 7, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn read_advances_cursor() {
        let mut buf = Buffer::new(8);
        buf.write(&[9, 8, 7, 6]).unwrap();
        buf.seek(1).unwrap();
        assert_eq!(buf.read(2).unwrap(), vec![8, 7]);
        assert_eq!(buf.position(), 3);
    }
}
