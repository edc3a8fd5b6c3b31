//! Binary encoding and decoding primitives
//!
//! Every table in a graft module is written through [`BytecodeWriter`] and read
//! back through [`BytecodeReader`]. All multi-byte values are little-endian and
//! strings are length-prefixed UTF-8.

use super::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur while decoding module data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// Unexpected end of the data stream
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown discriminant for a tagged value (type signature, literal, ...)
    #[error("Invalid {kind} tag {tag} at offset {offset}")]
    InvalidTag {
        /// What was being decoded
        kind: &'static str,
        /// The tag byte that was read
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },

    /// Type signature nested deeper than the decoder accepts
    #[error("Type signature nested too deeply at offset {0}")]
    NestingTooDeep(usize),
}

/// Writer for module binary data
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (number of bytes written)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit float
    pub fn emit_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a boolean as a single byte
    pub fn emit_bool(&mut self, value: bool) {
        self.emit_u8(value as u8);
    }

    /// Emit raw bytes without a length prefix
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an opcode byte
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Overwrite a previously emitted u32 (used for header checksums)
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }
}

/// Reader for module binary data
#[derive(Debug)]
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader over a buffer
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.remaining() < N {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    // ===== Basic Reading =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit float
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read a boolean byte (any non-zero value is true)
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }

    /// Read a collection count, rejecting counts larger than the remaining data
    ///
    /// Every encoded element occupies at least one byte, so a count larger than
    /// the unread tail can only come from corrupt input.
    pub fn read_count(&mut self) -> Result<usize, DecodeError> {
        let offset = self.position;
        let count = self.read_u32()? as usize;
        if count > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(offset));
        }
        Ok(count)
    }
}
