use bytes::Bytes;
use std::borrow::Cow;

use super::CodecError;
use crate::{common::ByteStr, value::Value};

/// Character set of text values on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
    Ascii,
    /// Uninterpreted bytes, decoded as [`Value::Bytes`].
    Octets,
}

impl Charset {
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF8",
            Charset::Latin1 => "ISO8859_1",
            Charset::Ascii => "ASCII",
            Charset::Octets => "OCTETS",
        }
    }

    /// Lookup by name, case insensitive.
    pub fn from_name(name: &str) -> Option<Charset> {
        let charset = match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" | "utf8mb4" | "unicode_fss" => Charset::Utf8,
            "latin1" | "iso8859_1" | "iso-8859-1" => Charset::Latin1,
            "ascii" | "us-ascii" => Charset::Ascii,
            "octets" | "binary" | "none" => Charset::Octets,
            _ => return None,
        };
        Some(charset)
    }

    /// Lookup by firebird `RDB$CHARACTER_SET_ID`.
    pub fn from_firebird_id(id: u8) -> Option<Charset> {
        match id {
            0 | 1 => Some(Charset::Octets),
            2 => Some(Charset::Ascii),
            3 | 4 => Some(Charset::Utf8),
            21 => Some(Charset::Latin1),
            _ => None,
        }
    }

    pub fn firebird_id(self) -> u8 {
        match self {
            Charset::Octets => 1,
            Charset::Ascii => 2,
            Charset::Utf8 => 4,
            Charset::Latin1 => 21,
        }
    }

    /// Lookup by mysql collation id.
    pub fn from_mysql_collation(id: u16) -> Option<Charset> {
        match id {
            5 | 8 | 15 | 31 | 47 | 48 | 49 | 94 => Some(Charset::Latin1),
            11 | 65 => Some(Charset::Ascii),
            33 | 45 | 46 | 83 | 192..=247 | 255..=323 => Some(Charset::Utf8),
            63 => Some(Charset::Octets),
            _ => None,
        }
    }

    pub fn mysql_collation(self) -> u16 {
        match self {
            Charset::Latin1 => 8,
            Charset::Ascii => 11,
            Charset::Utf8 => 45,
            Charset::Octets => 63,
        }
    }

    /// Decode text received in this charset.
    pub fn decode(self, bytes: Bytes) -> Result<Value, CodecError> {
        let text = match self {
            Charset::Octets => return Ok(Value::Bytes(bytes)),
            Charset::Utf8 => ByteStr::from_utf8(bytes)
                .map_err(|e| CodecError::invalid("UTF8", e.to_string()))?,
            Charset::Ascii => {
                if !bytes.is_ascii() {
                    return Err(CodecError::invalid("ASCII", "non ascii byte"));
                }
                ByteStr::from_utf8(bytes).map_err(|e| CodecError::invalid("ASCII", e.to_string()))?
            }
            Charset::Latin1 if bytes.is_ascii() => ByteStr::from_utf8(bytes)
                .map_err(|e| CodecError::invalid("ISO8859_1", e.to_string()))?,
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect::<String>().into(),
        };
        Ok(Value::Text(text))
    }

    /// Encode text to be sent in this charset.
    pub fn encode(self, text: &str) -> Result<Cow<'_, [u8]>, CodecError> {
        match self {
            Charset::Utf8 | Charset::Octets => Ok(Cow::Borrowed(text.as_bytes())),
            _ if text.is_ascii() => Ok(Cow::Borrowed(text.as_bytes())),
            Charset::Ascii => Err(CodecError::Charset(self.name())),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| CodecError::Charset(self.name())))
                .collect::<Result<Vec<u8>, _>>()
                .map(Cow::Owned),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latin1_round_trip() {
        let value = Charset::Latin1.decode(Bytes::from_static(b"caf\xe9")).unwrap();
        let Value::Text(text) = value else { panic!("expected text") };
        assert_eq!(text, "café");
        assert_eq!(&Charset::Latin1.encode(&text).unwrap()[..], b"caf\xe9");
        assert!(Charset::Latin1.encode("日本").is_err());
    }

    #[test]
    fn octets_are_bytes() {
        let value = Charset::Octets.decode(Bytes::from_static(&[0xff, 0])).unwrap();
        assert_eq!(value, Value::Bytes(Bytes::from_static(&[0xff, 0])));
    }

    #[test]
    fn invalid_utf8() {
        assert!(Charset::Utf8.decode(Bytes::from_static(&[0xc3])).is_err());
        assert!(Charset::Ascii.decode(Bytes::from_static(&[0xc3])).is_err());
    }

    #[test]
    fn lookup() {
        assert_eq!(Charset::from_name("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::from_firebird_id(21), Some(Charset::Latin1));
        assert_eq!(Charset::from_mysql_collation(255), Some(Charset::Utf8));
        assert_eq!(Charset::from_mysql_collation(Charset::Octets.mysql_collation()), Some(Charset::Octets));
    }
}
