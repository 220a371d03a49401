use bytes::BufMut;
use std::fmt;

use super::{FramingError, Payload};
use crate::value::Value;

/// Packed bit array marking which positions carry NULL.
///
/// Bit `offset + i`, least significant bit first within each byte, is set
/// when position `i` is NULL. Parameter bitmaps use offset 0, mysql binary
/// result rows reserve the first two bits and use offset 2.
#[derive(Clone, PartialEq, Eq)]
pub struct NullBitmap {
    bits: Vec<u8>,
    len: usize,
    offset: usize,
}

impl NullBitmap {
    /// Bitmap of `len` positions with no NULL.
    pub fn new(len: usize, offset: usize) -> NullBitmap {
        Self { bits: vec![0; Self::byte_len(len, offset)], len, offset }
    }

    /// Bitmap marking every [`Value::Null`] in `values`.
    pub fn from_values(values: &[Value], offset: usize) -> NullBitmap {
        let mut me = Self::new(values.len(), offset);
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                me.set_null(i);
            }
        }
        me
    }

    /// Number of bytes that hold `len` positions.
    pub const fn byte_len(len: usize, offset: usize) -> usize {
        (len + offset).div_ceil(8)
    }

    /// Read the bitmap bytes, without any trailing alignment.
    pub fn read(payload: &mut Payload, len: usize, offset: usize) -> Result<NullBitmap, FramingError> {
        let bits = payload.get_bytes(Self::byte_len(len, offset))?;
        Ok(Self { bits: bits.to_vec(), len, offset })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if position `i` is NULL.
    ///
    /// Positions past the end are never NULL.
    pub fn is_null(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        let bit = i + self.offset;
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn set_null(&mut self, i: usize) {
        assert!(i < self.len, "null bitmap position {i} out of range {}", self.len);
        let bit = i + self.offset;
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn write(&self, mut buf: impl BufMut) {
        buf.put_slice(&self.bits);
    }
}

impl fmt::Debug for NullBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullBitmap(")?;
        for i in 0..self.len {
            f.write_str(if self.is_null(i) { "1" } else { "0" })?;
        }
        f.write_str(")")
    }
}
