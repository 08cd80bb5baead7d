//! # Byte Codec
//!
//! Little-endian writer/reader pair used by every wire format in the crate.
//!
//! ## Design
//!
//! - Writes never fail; the size limit is checked once in [`ByteWriter::finish`]
//! - Reads return `Option` and never panic on truncated input
//! - Pod types are copied directly

use bytemuck::{bytes_of, Pod};
use horus_shared::constants::MAX_PACKET_SIZE;
use horus_shared::Vec3;

use crate::error::{NetError, NetResult};

/// Sequence number type alias.
pub type SequenceNumber = u16;

/// Returns true if `a` is more recent than `b`, accounting for wrap-around.
#[inline]
#[must_use]
pub const fn sequence_newer(a: SequenceNumber, b: SequenceNumber) -> bool {
    a != b && a.wrapping_sub(b) < 32768
}

/// Growable little-endian writer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Writes a vector as three f32s.
    #[inline]
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Writes a u16 length prefix followed by UTF-8 bytes.
    ///
    /// Strings longer than `u16::MAX` bytes are cut at a char boundary.
    pub fn write_str(&mut self, value: &str) {
        let mut end = value.len().min(usize::from(u16::MAX));
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        // end <= u16::MAX
        #[allow(clippy::cast_possible_truncation)]
        self.write_u16(end as u16);
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes raw bytes with no prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Finishes writing, enforcing the datagram size limit.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::PayloadTooLarge`] past `MAX_PACKET_SIZE`.
    pub fn finish(self) -> NetResult<Vec<u8>> {
        if self.buffer.len() > MAX_PACKET_SIZE {
            return Err(NetError::PayloadTooLarge {
                size: self.buffer.len(),
                limit: MAX_PACKET_SIZE,
            });
        }
        Ok(self.buffer)
    }
}

/// Little-endian reader over a received buffer.
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a new reader from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let slice = self.buffer.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> Option<f32> {
        self.take(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a one-byte boolean. Any non-zero byte is true.
    #[inline]
    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b != 0)
    }

    /// Reads three f32s as a vector.
    #[inline]
    pub fn read_vec3(&mut self) -> Option<Vec3> {
        Some(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Option<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    /// Reads a Pod type directly (unaligned).
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> Option<T> {
        self.take(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    /// Returns everything not read yet.
    #[inline]
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.position.min(self.buffer.len())..];
        self.position = self.buffer.len();
        rest
    }
}
