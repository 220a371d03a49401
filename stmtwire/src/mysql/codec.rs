//! Binary protocol value codecs.
use bytes::{BufMut, BytesMut};
use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

use super::{ColumnType, ParameterType};
use crate::{
    Result,
    codec::{BufMutExt, Charset, CodecError, DescriptorError, NullBitmap, Payload},
    value::Value,
};

/// Bit offset of the null bitmap of a binary result row.
pub const ROW_BITMAP_OFFSET: usize = 2;

/// Decode one value of type `ty`.
pub fn decode_value(payload: &mut Payload, ty: ParameterType, charset: Charset) -> Result<Value> {
    let value = match ty.column_type {
        ColumnType::Null => Value::Null,
        ColumnType::Tiny => match ty.unsigned {
            true => Value::Short(payload.get_u8()?.into()),
            false => Value::Short(payload.get_i8()?.into()),
        },
        ColumnType::Short | ColumnType::Year => match ty.unsigned {
            true => Value::Int(payload.get_u16_le()?.into()),
            false => Value::Short(payload.get_i16_le()?),
        },
        ColumnType::Long | ColumnType::Int24 => match ty.unsigned {
            true => Value::Long(payload.get_u32_le()?.into()),
            false => Value::Int(payload.get_i32_le()?),
        },
        ColumnType::LongLong => match ty.unsigned {
            true => {
                let value = payload.get_u64_le()?;
                i64::try_from(value).map_or(Value::Int128(value.into()), Value::Long)
            }
            false => Value::Long(payload.get_i64_le()?),
        },
        ColumnType::Float => Value::Float(payload.get_f32_le()?),
        ColumnType::Double => Value::Double(payload.get_f64_le()?),
        ColumnType::Date => match get_datetime(payload)? {
            Some(datetime) => Value::Date(datetime.date()),
            None => Value::Null,
        },
        ColumnType::DateTime | ColumnType::Timestamp => match get_datetime(payload)? {
            Some(datetime) => Value::Timestamp(datetime),
            None => Value::Null,
        },
        ColumnType::Time => Value::Time(get_time(payload)?),
        ColumnType::Decimal | ColumnType::NewDecimal => {
            Charset::Ascii.decode(payload.get_lenenc_bytes()?)?
        }
        ty if ty.is_binary() => Value::Bytes(payload.get_lenenc_bytes()?),
        _ => charset.decode(payload.get_lenenc_bytes()?)?,
    };
    Ok(value)
}

fn invalid(ty: &'static str, reason: impl ToString) -> CodecError {
    CodecError::invalid(ty, reason.to_string())
}

/// Length prefixed date and time, `None` for the zero date.
fn get_datetime(payload: &mut Payload) -> Result<Option<PrimitiveDateTime>> {
    let mut probe = payload.clone();
    let len = probe.get_u8()?;
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(invalid("DATETIME", format!("length {len}")).into());
    }
    let mut body = probe.split_payload(len.into())?;
    *payload = probe;

    if len == 0 {
        return Ok(None);
    }

    let year = body.get_u16_le()?;
    let month = body.get_u8()?;
    let day = body.get_u8()?;
    if (year, month, day) == (0, 0, 0) {
        return Ok(None);
    }
    let date = Month::try_from(month)
        .and_then(|month| Date::from_calendar_date(year.into(), month, day))
        .map_err(|e| invalid("DATE", e))?;

    let (mut hour, mut minute, mut second, mut micros) = (0, 0, 0, 0);
    if len >= 7 {
        hour = body.get_u8()?;
        minute = body.get_u8()?;
        second = body.get_u8()?;
    }
    if len == 11 {
        micros = body.get_u32_le()?;
    }
    let time = Time::from_hms_micro(hour, minute, second, micros).map_err(|e| invalid("DATETIME", e))?;
    Ok(Some(PrimitiveDateTime::new(date, time)))
}

/// Length prefixed time of day, negative or multi day intervals are rejected.
fn get_time(payload: &mut Payload) -> Result<Time> {
    let mut probe = payload.clone();
    let len = probe.get_u8()?;
    if !matches!(len, 0 | 8 | 12) {
        return Err(invalid("TIME", format!("length {len}")).into());
    }
    let mut body = probe.split_payload(len.into())?;
    *payload = probe;

    if len == 0 {
        return Ok(Time::MIDNIGHT);
    }

    let negative = body.get_u8()?;
    let days = body.get_u32_le()?;
    if negative != 0 || days != 0 {
        return Err(invalid("TIME", "interval outside of a day").into());
    }
    let hour = body.get_u8()?;
    let minute = body.get_u8()?;
    let second = body.get_u8()?;
    let micros = match len {
        12 => body.get_u32_le()?,
        _ => 0,
    };
    Ok(Time::from_hms_micro(hour, minute, second, micros).map_err(|e| invalid("TIME", e))?)
}

fn put_date(buf: &mut BytesMut, date: Date) -> Result<()> {
    let year = u16::try_from(date.year()).map_err(|_| invalid("DATE", format!("year {}", date.year())))?;
    buf.put_u16_le(year);
    buf.put_u8(date.month().into());
    buf.put_u8(date.day());
    Ok(())
}

fn put_datetime(buf: &mut BytesMut, datetime: PrimitiveDateTime) -> Result<()> {
    let time = datetime.time();
    let len: u8 = match (time == Time::MIDNIGHT, time.microsecond() == 0) {
        (true, _) => 4,
        (false, true) => 7,
        (false, false) => 11,
    };
    buf.put_u8(len);
    put_date(buf, datetime.date())?;
    if len >= 7 {
        buf.put_slice(&[time.hour(), time.minute(), time.second()]);
    }
    if len == 11 {
        buf.put_u32_le(time.microsecond());
    }
    Ok(())
}

fn put_time(buf: &mut BytesMut, time: Time) {
    if time == Time::MIDNIGHT {
        buf.put_u8(0);
        return;
    }
    let micros = time.microsecond();
    buf.put_u8(if micros == 0 { 8 } else { 12 });
    // positive, zero days
    buf.put_u8(0);
    buf.put_u32_le(0);
    buf.put_slice(&[time.hour(), time.minute(), time.second()]);
    if micros != 0 {
        buf.put_u32_le(micros);
    }
}

/// Encode a non NULL value as its [`ColumnType::from_kind`] type.
pub fn encode_value(value: &Value, buf: &mut BytesMut, charset: Charset) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Short(v) => buf.put_i16_le(*v),
        Value::Int(v) => buf.put_i32_le(*v),
        Value::Long(v) => buf.put_i64_le(*v),
        Value::Int128(v) => buf.put_lenenc_bytes(itoa::Buffer::new().format(*v).as_bytes()),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::Text(text) => buf.put_lenenc_bytes(&charset.encode(text)?),
        Value::Bytes(bytes) => buf.put_lenenc_bytes(bytes),
        Value::Date(date) => {
            buf.put_u8(4);
            put_date(buf, *date)?;
        }
        Value::Time(time) => put_time(buf, *time),
        Value::Timestamp(datetime) => put_datetime(buf, *datetime)?,
        Value::TimeTz(time, offset) => {
            // sent in utc
            let utc = *time - time::Duration::seconds(offset.whole_seconds().into());
            put_time(buf, utc);
        }
        Value::TimestampTz(datetime) => {
            let utc = datetime
                .checked_to_offset(UtcOffset::UTC)
                .ok_or_else(|| invalid("TIMESTAMP", "out of range"))?;
            put_datetime(buf, PrimitiveDateTime::new(utc.date(), utc.time()))?;
        }
    }
    Ok(())
}

/// Decode the parameter block of `COM_STMT_EXECUTE`.
///
/// Without `new-params-bound` the types of the previous execute are reused.
pub fn decode_parameters(
    payload: &mut Payload,
    count: usize,
    previous: &[ParameterType],
    charset: Charset,
) -> Result<(Vec<ParameterType>, Vec<Value>)> {
    if count == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let bitmap = NullBitmap::read(payload, count, 0)?;
    let types = match payload.get_u8()? {
        1 => {
            let mut types = Vec::with_capacity(count);
            for _ in 0..count {
                let code = payload.get_u8()?;
                let flag = payload.get_u8()?;
                types.push(ParameterType::from_pair(code, flag)?);
            }
            types
        }
        _ if previous.len() == count => previous.to_vec(),
        _ => {
            return Err(DescriptorError::CountMismatch { expected: count, found: previous.len() }.into());
        }
    };

    let mut values = Vec::with_capacity(count);
    for (i, ty) in types.iter().enumerate() {
        if bitmap.is_null(i) {
            values.push(Value::Null);
            continue;
        }
        let value = decode_value(payload, *ty, charset)
            .map_err(|e| e.context(format!("parameter {i} {}", ty.column_type)))?;
        values.push(value);
    }
    Ok((types, values))
}

/// Encode parameters with `new-params-bound`, inverse of [`decode_parameters`].
pub fn encode_parameters(values: &[Value], buf: &mut BytesMut, charset: Charset) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    NullBitmap::from_values(values, 0).write(&mut *buf);
    buf.put_u8(1);
    for value in values {
        buf.put_slice(&ParameterType::new(ColumnType::from_kind(value.kind())).to_pair());
    }
    for value in values {
        encode_value(value, buf, charset)?;
    }
    Ok(())
}

/// Encode a binary result row payload.
pub fn encode_row(row: &[Value], buf: &mut BytesMut, charset: Charset) -> Result<()> {
    buf.put_u8(0x00);
    NullBitmap::from_values(row, ROW_BITMAP_OFFSET).write(&mut *buf);
    for value in row {
        encode_value(value, buf, charset)?;
    }
    Ok(())
}

/// Decode a binary result row payload of known column types.
pub fn decode_row(payload: &mut Payload, types: &[ColumnType], charset: Charset) -> Result<Vec<Value>> {
    let header = payload.get_u8()?;
    if header != 0x00 {
        return Err(invalid("row", format!("header {header:#x}")).into());
    }
    let bitmap = NullBitmap::read(payload, types.len(), ROW_BITMAP_OFFSET)?;
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| match bitmap.is_null(i) {
            true => Ok(Value::Null),
            false => decode_value(payload, ParameterType::new(*ty), charset),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use time::macros::{date, datetime, time};

    use super::*;

    fn round_trip(value: Value) -> Value {
        let mut buf = BytesMut::new();
        encode_value(&value, &mut buf, Charset::Utf8).unwrap();
        let ty = ParameterType::new(ColumnType::from_kind(value.kind()));
        let mut payload = Payload::new(buf.freeze());
        let decoded = decode_value(&mut payload, ty, Charset::Utf8).unwrap();
        assert!(payload.is_empty(), "{value:?} left bytes");
        decoded
    }

    #[test]
    fn round_trips() {
        let values = [
            Value::Short(-7),
            Value::Int(i32::MIN),
            Value::Long(i64::MAX),
            Value::Float(0.5),
            Value::Double(-1e300),
            Value::from(""),
            Value::from("x".repeat(300)),
            Value::Bytes(Bytes::from_static(&[0, 0xff])),
            Value::Date(date!(2024-02-29)),
            Value::Time(time!(0:00)),
            Value::Time(time!(13:14:15)),
            Value::Time(time!(13:14:15.000_016)),
            Value::Timestamp(datetime!(1999-12-31 0:00)),
            Value::Timestamp(datetime!(1999-12-31 23:59:59)),
            Value::Timestamp(datetime!(1999-12-31 23:59:59.999_999)),
        ];
        for value in values {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn widened_types() {
        assert_eq!(round_trip(Value::Bool(true)), Value::Short(1));
        assert_eq!(round_trip(Value::Int128(-12345678901234567890)), Value::from("-12345678901234567890"));
        assert_eq!(
            round_trip(Value::TimestampTz(datetime!(2020-01-01 2:00 +2))),
            Value::Timestamp(datetime!(2020-01-01 0:00))
        );
    }

    #[test]
    fn temporal_lengths() {
        let mut buf = BytesMut::new();
        encode_value(&Value::Timestamp(datetime!(2000-01-02 0:00)), &mut buf, Charset::Utf8).unwrap();
        assert_eq!(&buf[..], &[4, 0xd0, 0x07, 1, 2]);

        let mut buf = BytesMut::new();
        encode_value(&Value::Time(time!(1:02:03)), &mut buf, Charset::Utf8).unwrap();
        assert_eq!(&buf[..], &[8, 0, 0, 0, 0, 0, 1, 2, 3]);

        let mut zero = Payload::from_static(&[0]);
        let ty = ParameterType::new(ColumnType::DateTime);
        assert_eq!(decode_value(&mut zero, ty, Charset::Utf8).unwrap(), Value::Null);

        let mut bad = Payload::from_static(&[5, 0, 0, 0, 0, 0]);
        assert!(!decode_value(&mut bad, ty, Charset::Utf8).unwrap_err().is_connection_fatal());

        let mut days = Payload::from_static(&[8, 0, 1, 0, 0, 0, 1, 2, 3]);
        let ty = ParameterType::new(ColumnType::Time);
        assert!(decode_value(&mut days, ty, Charset::Utf8).is_err());
    }

    #[test]
    fn unsigned() {
        let ty = |column_type| ParameterType { column_type, unsigned: true };
        let mut p = Payload::from_static(&[0xff]);
        assert_eq!(decode_value(&mut p, ty(ColumnType::Tiny), Charset::Utf8).unwrap(), Value::Short(255));
        let mut p = Payload::from_static(&[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(decode_value(&mut p, ty(ColumnType::Long), Charset::Utf8).unwrap(), Value::Long(0xffff_ffff));
        let mut p = Payload::from_static(&[0xff; 8]);
        assert_eq!(
            decode_value(&mut p, ty(ColumnType::LongLong), Charset::Utf8).unwrap(),
            Value::Int128(u64::MAX.into())
        );
    }

    #[test]
    fn parameters() {
        // bitmap, new-params-bound, LONG and VAR_STRING, 42 and "abc"
        let packet = Bytes::from_static(&[
            0b00, 1, 0x03, 0, 0xfd, 0,
            42, 0, 0, 0, 3, b'a', b'b', b'c',
        ]);
        let (types, values) = decode_parameters(&mut Payload::new(packet.clone()), 2, &[], Charset::Utf8).unwrap();
        assert_eq!(types, [ParameterType::new(ColumnType::Long), ParameterType::new(ColumnType::VarString)]);
        assert_eq!(values, [Value::Int(42), Value::from("abc")]);

        let mut buf = BytesMut::new();
        encode_parameters(&values, &mut buf, Charset::Utf8).unwrap();
        assert_eq!(buf.freeze(), packet);

        // reuse of previous types, second parameter NULL
        let mut payload = Payload::from_static(&[0b10, 0, 7, 0, 0, 0]);
        let (_, values) = decode_parameters(&mut payload, 2, &types, Charset::Utf8).unwrap();
        assert_eq!(values, [Value::Int(7), Value::Null]);
        assert!(payload.is_empty());

        let mut payload = Payload::from_static(&[0, 0]);
        assert!(decode_parameters(&mut payload, 2, &[], Charset::Utf8).is_err());
    }

    #[test]
    fn rows() {
        let row = [Value::Int(1), Value::Null, Value::from("ab")];
        let mut buf = BytesMut::new();
        encode_row(&row, &mut buf, Charset::Utf8).unwrap();
        // bit 3 is the second column after the 2 reserved bits
        assert_eq!(&buf[..2], &[0x00, 0b1000]);

        let types = [ColumnType::Long, ColumnType::Long, ColumnType::VarString];
        let mut payload = Payload::new(buf.freeze());
        assert_eq!(decode_row(&mut payload, &types, Charset::Utf8).unwrap(), row);
        assert!(payload.is_empty());
    }
}
