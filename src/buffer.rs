//! Cursor-style readers/writers over the wire formats used by the
//! logical-replication COPY stream: big-endian integers and
//! NUL-terminated cstrings on the read side, the fixed-layout standby
//! status update message on the write side.

use crate::errors::{ReplicationError, ReplicationResult};
use crate::utils::{buf_recv_i16, buf_recv_i32, buf_recv_i64, buf_recv_u32, buf_recv_u64};

/// A buffer reader that manages position and provides meaningful parsing methods.
#[derive(Debug)]
pub struct BufferReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    /// Create a new buffer reader from a byte slice.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if we have at least `count` bytes remaining.
    pub fn has_bytes(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    /// Read a single unsigned byte at current position.
    pub fn read_u8(&mut self) -> ReplicationResult<u8> {
        if !self.has_bytes(1) {
            return Err(ReplicationError::parse("not enough bytes for u8"));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read the tag/marker byte as an ASCII char.
    pub fn read_char(&mut self) -> ReplicationResult<char> {
        Ok(self.read_u8()? as char)
    }

    /// Read a single signed byte (PostgreSQL's `int8` on the wire).
    pub fn read_i8(&mut self) -> ReplicationResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a 16-bit signed integer at current position.
    pub fn read_i16(&mut self) -> ReplicationResult<i16> {
        if !self.has_bytes(2) {
            return Err(ReplicationError::parse("not enough bytes for i16"));
        }
        let value = buf_recv_i16(&self.buffer[self.position..]);
        self.position += 2;
        Ok(value)
    }

    /// Read a 32-bit unsigned integer at current position.
    pub fn read_u32(&mut self) -> ReplicationResult<u32> {
        if !self.has_bytes(4) {
            return Err(ReplicationError::parse("not enough bytes for u32"));
        }
        let value = buf_recv_u32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    /// Read a 32-bit signed integer at current position.
    pub fn read_i32(&mut self) -> ReplicationResult<i32> {
        if !self.has_bytes(4) {
            return Err(ReplicationError::parse("not enough bytes for i32"));
        }
        let value = buf_recv_i32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    /// Read a 64-bit unsigned integer at current position.
    pub fn read_u64(&mut self) -> ReplicationResult<u64> {
        if !self.has_bytes(8) {
            return Err(ReplicationError::parse("not enough bytes for u64"));
        }
        let value = buf_recv_u64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    /// Read a 64-bit signed integer at current position.
    pub fn read_i64(&mut self) -> ReplicationResult<i64> {
        if !self.has_bytes(8) {
            return Err(ReplicationError::parse("not enough bytes for i64"));
        }
        let value = buf_recv_i64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    /// Read a NUL-terminated UTF-8 string, advancing past the terminator.
    pub fn read_cstring(&mut self) -> ReplicationResult<String> {
        let start = self.position;
        while self.position < self.buffer.len() && self.buffer[self.position] != 0 {
            self.position += 1;
        }
        if self.position >= self.buffer.len() {
            return Err(ReplicationError::parse("cstring not NUL-terminated"));
        }
        let value = String::from_utf8(self.buffer[start..self.position].to_vec())?;
        self.position += 1; // skip the NUL
        Ok(value)
    }

    /// Read and consume exactly `len` raw bytes as UTF-8 text.
    pub fn read_text(&mut self, len: usize) -> ReplicationResult<String> {
        if !self.has_bytes(len) {
            return Err(ReplicationError::parse("text data truncated"));
        }
        let value = String::from_utf8(self.buffer[self.position..self.position + len].to_vec())?;
        self.position += len;
        Ok(value)
    }

    /// Skip exactly `len` raw bytes without interpreting them.
    pub fn skip(&mut self, len: usize) -> ReplicationResult<()> {
        if !self.has_bytes(len) {
            return Err(ReplicationError::parse("not enough bytes to skip"));
        }
        self.position += len;
        Ok(())
    }
}

/// A buffer writer used to construct the fixed-layout standby status
/// update message sent back to the server as feedback.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BufferWriter<'a> {
    /// Create a new buffer writer from a mutable byte slice.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    fn has_space(&self, count: usize) -> bool {
        self.buffer.len().saturating_sub(self.position) >= count
    }

    /// Write a single byte at current position.
    pub fn write_u8(&mut self, value: u8) -> ReplicationResult<()> {
        if !self.has_space(1) {
            return Err(ReplicationError::buffer("not enough space for u8"));
        }
        self.buffer[self.position] = value;
        self.position += 1;
        Ok(())
    }

    /// Write a 64-bit unsigned integer at current position.
    pub fn write_u64(&mut self, value: u64) -> ReplicationResult<()> {
        if !self.has_space(8) {
            return Err(ReplicationError::buffer("not enough space for u64"));
        }
        crate::utils::buf_send_u64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    /// Write a 64-bit signed integer at current position.
    pub fn write_i64(&mut self, value: i64) -> ReplicationResult<()> {
        if !self.has_space(8) {
            return Err(ReplicationError::buffer("not enough space for i64"));
        }
        crate::utils::buf_send_i64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    /// Total bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.position
    }
}
