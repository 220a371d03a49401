use bytes::BufMut;

/// Wire lengths are `u32`, while rust lengths are `usize`.
pub trait UsizeExt {
    /// Panics when overflow instead of wrapping.
    fn to_u32(self) -> u32;
}

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("buffer too large for wire length")
    }
}

/// Number of zero bytes that align a field of `len` bytes to 4 bytes.
pub const fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Wire field writers over [`BufMut`].
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);

    /// Write a 4 byte big endian length, the bytes, then alignment padding.
    fn put_var_buffer(&mut self, bytes: &[u8]);

    /// Write the zero padding that aligns a field of `len` bytes.
    fn put_padding(&mut self, len: usize);

    /// Write `n` zero bytes.
    fn put_reserved(&mut self, n: usize);

    /// Write mysql length encoded integer.
    fn put_lenenc_int(&mut self, value: u64);

    /// Write mysql length encoded integer followed by the bytes.
    fn put_lenenc_bytes(&mut self, bytes: &[u8]);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }

    fn put_var_buffer(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len().to_u32());
        self.put(bytes);
        self.put_padding(bytes.len());
    }

    fn put_padding(&mut self, len: usize) {
        self.put_bytes(0, padding(len));
    }

    fn put_reserved(&mut self, n: usize) {
        self.put_bytes(0, n);
    }

    fn put_lenenc_int(&mut self, value: u64) {
        match value {
            0..0xfb => self.put_u8(value as u8),
            0xfb..0x1_0000 => {
                self.put_u8(0xfc);
                self.put_u16_le(value as u16);
            }
            0x1_0000..0x100_0000 => {
                self.put_u8(0xfd);
                self.put_uint_le(value, 3);
            }
            _ => {
                self.put_u8(0xfe);
                self.put_u64_le(value);
            }
        }
    }

    fn put_lenenc_bytes(&mut self, bytes: &[u8]) {
        self.put_lenenc_int(bytes.len() as u64);
        self.put(bytes);
    }
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
