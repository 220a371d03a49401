//! Octet level codec shared by every dialect.
//!
//! Reads go through [`Payload`], a bounds checked cursor over a received
//! packet. A read that would run past the end fails with
//! [`FramingError::Truncated`] and leaves the cursor untouched, so a caller
//! never observes a half applied field.
//!
//! Writes go through [`BufMutExt`] on any [`BufMut`][bytes::BufMut].
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt};

use crate::{Result, common::ByteStr, ext::FmtExt, value::Value};

mod charset;
mod bitmap;

pub use charset::Charset;
pub use bitmap::NullBitmap;
pub use crate::ext::{BufMutExt, padding};

/// Malformed packet framing, the connection cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("truncated packet, needed {needed} bytes but {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid length prefix {0}")]
    BadLength(u64),
    #[error("string is not nul terminated")]
    MissingNul,
    #[error("unknown {dialect} command {code:#x}")]
    UnknownCommand { dialect: &'static str, code: u32 },
    #[error("unsupported {dialect} protocol version {version}")]
    UnsupportedVersion { dialect: &'static str, version: u32 },
}

/// Malformed type descriptor, scoped to the current statement.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("unknown type tag {tag}")]
    UnknownTypeTag { tag: u32 },
    #[error("malformed type descriptor: {0}")]
    Malformed(&'static str),
    #[error("expected {expected} values, found {found}")]
    CountMismatch { expected: usize, found: usize },
}

/// Value that cannot be decoded or encoded, scoped to the current statement.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{0} values are not supported")]
    Unsupported(Cow<'static, str>),
    #[error("invalid {ty} value: {reason}")]
    Invalid { ty: &'static str, reason: Cow<'static, str> },
    #[error("text is not representable in {0}")]
    Charset(&'static str),
    #[error("blob of {size} bytes exceeds limit of {limit} bytes")]
    BlobTooLarge { size: usize, limit: usize },
}

impl CodecError {
    pub(crate) fn unsupported(ty: impl Into<Cow<'static, str>>) -> CodecError {
        Self::Unsupported(ty.into())
    }

    pub(crate) fn invalid(ty: &'static str, reason: impl Into<Cow<'static, str>>) -> CodecError {
        Self::Invalid { ty, reason: reason.into() }
    }
}

/// Bounds checked read cursor over a received packet.
#[derive(Clone, Default)]
pub struct Payload {
    buf: Bytes,
}

macro_rules! get {
    ($($name:ident -> $ty:ty;)*) => {$(
        pub fn $name(&mut self) -> Result<$ty, FramingError> {
            self.ensure(size_of::<$ty>())?;
            Ok(self.buf.$name())
        }
    )*};
}

impl Payload {
    pub fn new(buf: Bytes) -> Payload {
        Self { buf }
    }

    pub const fn from_static(buf: &'static [u8]) -> Payload {
        Self { buf: Bytes::from_static(buf) }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unread bytes.
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), FramingError> {
        match self.buf.len() < needed {
            true => Err(FramingError::Truncated { needed, remaining: self.buf.len() }),
            false => Ok(()),
        }
    }

    get! {
        get_u8 -> u8;
        get_i8 -> i8;
        get_u16 -> u16;
        get_u16_le -> u16;
        get_i16 -> i16;
        get_i16_le -> i16;
        get_u32 -> u32;
        get_u32_le -> u32;
        get_i32 -> i32;
        get_i32_le -> i32;
        get_u64 -> u64;
        get_u64_le -> u64;
        get_i64 -> i64;
        get_i64_le -> i64;
        get_i128 -> i128;
        get_f32 -> f32;
        get_f32_le -> f32;
        get_f64 -> f64;
        get_f64_le -> f64;
    }

    /// Read the next big endian `u32` without advancing.
    pub fn peek_u32(&self) -> Result<u32, FramingError> {
        self.ensure(4)?;
        Ok(u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]))
    }

    /// Read the next little endian `u32` without advancing.
    pub fn peek_u32_le(&self) -> Result<u32, FramingError> {
        self.ensure(4)?;
        Ok(u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]))
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<Bytes, FramingError> {
        self.ensure(n)?;
        Ok(self.buf.split_to(n))
    }

    /// Split the next `n` bytes into their own payload.
    pub fn split_payload(&mut self, n: usize) -> Result<Payload, FramingError> {
        self.get_bytes(n).map(Payload::new)
    }

    /// Advance past `n` bytes without interpreting them.
    pub fn skip_reserved(&mut self, n: usize) -> Result<(), FramingError> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    /// Advance past the padding that follows a field of `len` bytes.
    pub fn skip_padding(&mut self, len: usize) -> Result<(), FramingError> {
        self.skip_reserved(padding(len))
    }

    /// Read a 4 byte big endian length, the bytes, then the alignment padding.
    pub fn get_var_buffer(&mut self) -> Result<Bytes, FramingError> {
        let len = self.peek_u32()? as usize;
        self.ensure(4 + len + padding(len))?;
        self.buf.advance(4);
        let data = self.buf.split_to(len);
        self.buf.advance(padding(len));
        Ok(data)
    }

    /// Read a variable buffer and decode it with `charset`.
    pub fn get_string(&mut self, charset: Charset) -> Result<Value> {
        let data = self.get_var_buffer()?;
        Ok(charset.decode(data)?)
    }

    /// Read nul terminated utf8 string.
    pub fn get_nul_bytestr(&mut self) -> Result<ByteStr> {
        let Some(end) = self.buf.iter().position(|e| *e == b'\0') else {
            return Err(FramingError::MissingNul.into());
        };
        let string = self.buf.split_to(end);
        self.buf.advance(1);
        Ok(ByteStr::from_utf8(string)?)
    }

    /// Read mysql length encoded integer.
    pub fn get_lenenc_int(&mut self) -> Result<u64, FramingError> {
        let width = match self.buf.first() {
            None => return Err(FramingError::Truncated { needed: 1, remaining: 0 }),
            Some(0xfc) => 2,
            Some(0xfd) => 3,
            Some(0xfe) => 8,
            Some(b @ (0xfb | 0xff)) => return Err(FramingError::BadLength(*b as u64)),
            Some(_) => 0,
        };
        self.ensure(1 + width)?;
        let first = self.buf.get_u8();
        Ok(match width {
            0 => first as u64,
            n => self.buf.get_uint_le(n),
        })
    }

    /// Read mysql length encoded string as bytes.
    pub fn get_lenenc_bytes(&mut self) -> Result<Bytes, FramingError> {
        let mut probe = self.clone();
        let len = probe.get_lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| FramingError::BadLength(len))?;
        probe.ensure(len)?;
        *self = probe;
        Ok(self.buf.split_to(len))
    }
}

impl From<Bytes> for Payload {
    fn from(buf: Bytes) -> Self {
        Self::new(buf)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.buf.lossy()).finish()
    }
}
