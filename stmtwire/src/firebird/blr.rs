//! BLR message blocks, the type descriptors of parameters and output columns.
//!
//! ```text
//! blr_version5 blr_begin blr_message <msg number>
//! <field count: u16 le>
//! { <type tag> <args> blr_short 0 }*
//! blr_end blr_eoc
//! ```
//!
//! Every declared value is followed by a `blr_short 0` null indicator, hence
//! the field count is twice the value count.
use bytes::{BufMut, Bytes, BytesMut};

use super::ColumnType;
use crate::{
    codec::{DescriptorError, FramingError, Payload},
    common::{span, verbose},
};

pub const BLR_VERSION5: u8 = 5;
pub const BLR_BEGIN: u8 = 2;
pub const BLR_MESSAGE: u8 = 4;
pub const BLR_SHORT: u8 = 7;
pub const BLR_QUAD: u8 = 9;
pub const BLR_END: u8 = 255;
pub const BLR_EOC: u8 = 76;

/// Bytes before the field count.
const HEADER_LEN: usize = 4;
/// `blr_short 0` after every value.
const NULL_INDICATOR_LEN: usize = 2;

fn truncated(_: FramingError) -> DescriptorError {
    DescriptorError::Malformed("message ended before blr_end")
}

/// Parse a BLR message into its value types.
///
/// An empty block describes a statement without parameters.
pub fn parse(blr: Bytes) -> Result<Vec<ColumnType>, DescriptorError> {
    if blr.is_empty() {
        return Ok(Vec::new());
    }

    let mut payload = Payload::new(blr);
    payload.skip_reserved(HEADER_LEN).map_err(truncated)?;
    let fields = payload.get_u16_le().map_err(truncated)?;
    span!("blr_message", fields);

    let mut types = Vec::with_capacity(fields as usize / 2);
    loop {
        let tag = payload.get_u8().map_err(truncated)?;
        if tag == BLR_END {
            break;
        }
        let ty = ColumnType::from_tag(tag)?;
        verbose!(tag, %ty);
        payload
            .skip_reserved(ty.skip_count() + NULL_INDICATOR_LEN)
            .map_err(truncated)?;
        types.push(ty);
    }

    Ok(types)
}

/// Build a BLR message declaring `types`, inline arguments are zero.
///
/// Types without a tag of their own are declared as `blr_quad`. Fails when
/// the field count does not fit the 16 bit header.
pub fn build(types: &[ColumnType]) -> Result<Bytes, DescriptorError> {
    if types.is_empty() {
        return Ok(Bytes::new());
    }

    let fields = types
        .len()
        .checked_mul(2)
        .and_then(|fields| u16::try_from(fields).ok())
        .ok_or(DescriptorError::Malformed("too many values for a blr message"))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 2 + types.len() * 8 + 2);
    buf.put_slice(&[BLR_VERSION5, BLR_BEGIN, BLR_MESSAGE, 0]);
    buf.put_u16_le(fields);
    for ty in types {
        let (tag, declared) = match ty.tag() {
            Some(tag) => (tag, *ty),
            None => (BLR_QUAD, ColumnType::Quad),
        };
        buf.put_u8(tag);
        buf.put_bytes(0, declared.skip_count());
        buf.put_slice(&[BLR_SHORT, 0]);
    }
    buf.put_slice(&[BLR_END, BLR_EOC]);
    Ok(buf.freeze())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_block() {
        assert!(parse(Bytes::new()).unwrap().is_empty());
        assert!(build(&[]).unwrap().is_empty());
    }

    #[test]
    fn long_and_varying() {
        // LONG scale 0, VARYING2 charset 4 length 3
        let blr = Bytes::from_static(&[
            5, 2, 4, 0, 4, 0,
            8, 0, 7, 0,
            38, 4, 0, 3, 0, 7, 0,
            255, 76,
        ]);
        assert_eq!(parse(blr).unwrap(), [ColumnType::Long, ColumnType::Varying]);
    }

    #[test]
    fn build_then_parse() {
        let types = [
            ColumnType::Short,
            ColumnType::Text,
            ColumnType::LegacyVarying,
            ColumnType::Double,
            ColumnType::Blob,
            ColumnType::TimestampTz,
            ColumnType::Boolean,
        ];
        assert_eq!(parse(build(&types).unwrap()).unwrap(), types);
    }

    #[test]
    fn untagged_types_are_declared_as_quad() {
        let blr = build(&[ColumnType::Long, ColumnType::Null, ColumnType::Array, ColumnType::Short]).unwrap();
        assert_eq!(
            parse(blr).unwrap(),
            [ColumnType::Long, ColumnType::Quad, ColumnType::Quad, ColumnType::Short]
        );
    }

    #[test]
    fn field_count_overflow() {
        let types = vec![ColumnType::Long; 32_768];
        assert!(matches!(build(&types), Err(DescriptorError::Malformed(_))));
        assert_eq!(parse(build(&types[1..]).unwrap()).unwrap().len(), 32_767);
    }

    #[test]
    fn unknown_tag_is_descriptor_error() {
        let blr = Bytes::from_static(&[5, 2, 4, 0, 2, 0, 99, 0, 7, 0, 255, 76]);
        assert!(matches!(parse(blr), Err(DescriptorError::UnknownTypeTag { tag: 99 })));
    }

    #[test]
    fn truncated_block_does_not_panic() {
        let full = build(&[ColumnType::Varying, ColumnType::Int64]).unwrap();
        for len in 1..full.len() - 1 {
            let result = parse(full.slice(..len));
            assert!(matches!(result, Err(DescriptorError::Malformed(_))), "len {len}");
        }
    }
}
