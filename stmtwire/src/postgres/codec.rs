//! Binary and text format value codecs.
//!
//! Binary dates count days and binary times count microseconds from
//! 2000-01-01 00:00. A value is always a whole message field, so a decode
//! that leaves bytes behind is an error.
use bytes::{BufMut, Bytes, BytesMut};
use time::{
    Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
    macros::{datetime, format_description},
};

use super::{PgFormat, PgType};
use crate::{
    Result,
    codec::{Charset, CodecError, Payload},
    common::ByteStr,
    value::Value,
};

const PG_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 0:00);

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xc000;
const NBASE: u128 = 10_000;

const MICROS_PER_DAY: i64 = 86_400_000_000;

fn invalid(ty: PgType, reason: impl ToString) -> CodecError {
    CodecError::invalid(ty.name(), reason.to_string())
}

/// Decode a parameter value in `format`.
pub fn decode(raw: Bytes, ty: PgType, format: PgFormat, charset: Charset) -> Result<Value> {
    match format {
        PgFormat::Text => decode_text(raw, ty, charset),
        PgFormat::Binary => decode_binary(raw, ty, charset),
    }
}

/// Encode a non NULL value in `format` as its [`PgType::from_kind`] type.
pub fn encode(value: &Value, format: PgFormat, buf: &mut BytesMut, charset: Charset) -> Result<()> {
    match format {
        PgFormat::Text => encode_text(value, buf, charset),
        PgFormat::Binary => encode_binary(value, buf, charset),
    }
}

// ===== Binary =====

pub fn decode_binary(raw: Bytes, ty: PgType, charset: Charset) -> Result<Value> {
    let mut payload = Payload::new(raw);
    let value = match ty {
        PgType::Text | PgType::Varchar | PgType::Unknown => {
            return Ok(charset.decode(payload.into_bytes())?);
        }
        PgType::Bytea => return Ok(Value::Bytes(payload.into_bytes())),
        PgType::Bool => Value::Bool(payload.get_u8()? != 0),
        PgType::Int2 => Value::Short(payload.get_i16()?),
        PgType::Int4 => Value::Int(payload.get_i32()?),
        PgType::Int8 => Value::Long(payload.get_i64()?),
        PgType::Float4 => Value::Float(payload.get_f32()?),
        PgType::Float8 => Value::Double(payload.get_f64()?),
        PgType::Numeric => decode_numeric(&mut payload)?,
        PgType::Date => Value::Date(decode_date(payload.get_i32()?)?),
        PgType::Time => Value::Time(decode_time(payload.get_i64()?)?),
        PgType::Timestamp => Value::Timestamp(decode_timestamp(payload.get_i64()?)?),
        PgType::TimestampTz => Value::TimestampTz(decode_timestamp(payload.get_i64()?)?.assume_utc()),
        PgType::TimeTz => {
            let time = decode_time(payload.get_i64()?)?;
            // seconds west of utc
            let zone = payload.get_i32()?;
            let offset = zone
                .checked_neg()
                .and_then(|secs| UtcOffset::from_whole_seconds(secs).ok())
                .ok_or_else(|| invalid(ty, format!("zone {zone}")))?;
            Value::TimeTz(time, offset)
        }
    };
    if !payload.is_empty() {
        return Err(invalid(ty, format!("{} trailing bytes", payload.remaining())).into());
    }
    Ok(value)
}

pub fn encode_binary(value: &Value, buf: &mut BytesMut, charset: Charset) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Short(v) => buf.put_i16(*v),
        Value::Int(v) => buf.put_i32(*v),
        Value::Long(v) => buf.put_i64(*v),
        Value::Int128(v) => put_numeric(buf, *v),
        Value::Float(v) => buf.put_f32(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::Text(text) => buf.put_slice(&charset.encode(text)?),
        Value::Bytes(bytes) => buf.put_slice(bytes),
        Value::Date(date) => buf.put_i32(encode_date(*date)),
        Value::Time(time) => buf.put_i64(encode_time(*time)),
        Value::Timestamp(datetime) => buf.put_i64(encode_timestamp(*datetime)),
        Value::TimeTz(time, offset) => {
            buf.put_i64(encode_time(*time));
            buf.put_i32(-offset.whole_seconds());
        }
        Value::TimestampTz(datetime) => buf.put_i64(encode_timestamp(to_utc(*datetime)?)),
    }
    Ok(())
}

fn decode_date(days: i32) -> Result<Date, CodecError> {
    PG_EPOCH
        .date()
        .checked_add(Duration::days(days.into()))
        .ok_or_else(|| invalid(PgType::Date, format!("{days} days out of range")))
}

fn encode_date(date: Date) -> i32 {
    // the calendar range of `Date` fits in i32 days
    (date - PG_EPOCH.date()).whole_days() as i32
}

fn decode_time(micros: i64) -> Result<Time, CodecError> {
    if !(0..MICROS_PER_DAY).contains(&micros) {
        return Err(invalid(PgType::Time, format!("{micros} microseconds out of range")));
    }
    Ok(Time::MIDNIGHT + Duration::microseconds(micros))
}

fn encode_time(time: Time) -> i64 {
    (time - Time::MIDNIGHT).whole_microseconds() as i64
}

fn decode_timestamp(micros: i64) -> Result<PrimitiveDateTime, CodecError> {
    PG_EPOCH
        .checked_add(Duration::microseconds(micros))
        .ok_or_else(|| invalid(PgType::Timestamp, format!("{micros} microseconds out of range")))
}

fn encode_timestamp(datetime: PrimitiveDateTime) -> i64 {
    (datetime - PG_EPOCH).whole_microseconds() as i64
}

fn to_utc(datetime: OffsetDateTime) -> Result<PrimitiveDateTime, CodecError> {
    let utc = datetime
        .checked_to_offset(UtcOffset::UTC)
        .ok_or_else(|| invalid(PgType::TimestampTz, "out of range"))?;
    Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
}

/// Write `value` as a numeric with scale 0.
///
/// ```text
/// ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: [i16; ndigits]
/// ```
fn put_numeric(buf: &mut BytesMut, value: i128) {
    let mut digits = Vec::new();
    let mut rest = value.unsigned_abs();
    while rest > 0 {
        digits.push((rest % NBASE) as i16);
        rest /= NBASE;
    }
    digits.reverse();

    let weight = digits.len().saturating_sub(1) as i16;
    while digits.last() == Some(&0) {
        digits.pop();
    }

    buf.put_i16(digits.len() as i16);
    buf.put_i16(weight);
    buf.put_u16(if value < 0 { NUMERIC_NEG } else { NUMERIC_POS });
    buf.put_u16(0);
    for digit in digits {
        buf.put_i16(digit);
    }
}

/// Integral numerics that fit become [`Value::Int128`], others their text.
fn decode_numeric(payload: &mut Payload) -> Result<Value> {
    let ndigits = payload.get_i16()?;
    let weight = payload.get_i16()?;
    let sign = payload.get_u16()?;
    let dscale = payload.get_u16()?;

    let ndigits = usize::try_from(ndigits).map_err(|_| invalid(PgType::Numeric, "negative digit count"))?;
    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        let digit = payload.get_i16()?;
        if !(0..NBASE as i16).contains(&digit) {
            return Err(invalid(PgType::Numeric, format!("digit {digit}")).into());
        }
        digits.push(digit);
    }

    let negative = match sign {
        NUMERIC_POS => false,
        NUMERIC_NEG => true,
        NUMERIC_NAN => return Ok(Value::Text(ByteStr::from_static("NaN"))),
        sign => return Err(invalid(PgType::Numeric, format!("sign {sign:#06x}")).into()),
    };

    if dscale == 0 && digits.len() as i32 <= weight as i32 + 1 {
        if let Some(value) = numeric_integer(negative, weight, &digits) {
            return Ok(Value::Int128(value));
        }
    }
    Ok(Value::Text(numeric_text(negative, weight, dscale, &digits).into()))
}

fn numeric_integer(negative: bool, weight: i16, digits: &[i16]) -> Option<i128> {
    let mut value = 0i128;
    for i in 0..=weight.max(0) as usize {
        let digit = i128::from(digits.get(i).copied().unwrap_or(0));
        let digit = if negative { -digit } else { digit };
        value = value.checked_mul(NBASE as i128)?.checked_add(digit)?;
    }
    Some(value)
}

fn numeric_text(negative: bool, weight: i16, dscale: u16, digits: &[i16]) -> String {
    let mut text = String::new();
    if weight < 0 {
        text.push('0');
    } else {
        for i in 0..=weight as usize {
            let digit = digits.get(i).copied().unwrap_or(0);
            match i {
                0 => text.push_str(itoa::Buffer::new().format(digit)),
                _ => text.push_str(&format!("{digit:04}")),
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        for group in 0..(dscale as i32 + 3) / 4 {
            let digit = usize::try_from(weight as i32 + 1 + group)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0);
            fraction.push_str(&format!("{digit:04}"));
        }
        fraction.truncate(dscale as usize);
        text.push('.');
        text.push_str(&fraction);
    }

    // zero has no sign
    if negative && text.bytes().any(|b| matches!(b, b'1'..=b'9')) {
        text.insert(0, '-');
    }
    text
}

// ===== Text =====

pub fn decode_text(raw: Bytes, ty: PgType, charset: Charset) -> Result<Value> {
    if let PgType::Text | PgType::Varchar | PgType::Unknown = ty {
        return Ok(charset.decode(raw)?);
    }

    let text = ByteStr::from_utf8(raw)?;
    let value = match ty {
        PgType::Bool => match text.as_str() {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            other => return Err(invalid(ty, format!("`{other}`")).into()),
        },
        PgType::Int2 => Value::Short(text.parse().map_err(|e| invalid(ty, e))?),
        PgType::Int4 => Value::Int(text.parse().map_err(|e| invalid(ty, e))?),
        PgType::Int8 => Value::Long(text.parse().map_err(|e| invalid(ty, e))?),
        PgType::Float4 => Value::Float(text.parse().map_err(|e| invalid(ty, e))?),
        PgType::Float8 => Value::Double(text.parse().map_err(|e| invalid(ty, e))?),
        PgType::Numeric => match text.parse() {
            Ok(value) => Value::Int128(value),
            Err(_) => Value::Text(text),
        },
        PgType::Bytea => Value::Bytes(decode_hex(&text)?),
        PgType::Date => {
            Value::Date(Date::parse(&text, format_description!("[year]-[month]-[day]")).map_err(|e| invalid(ty, e))?)
        }
        PgType::Time => Value::Time(parse_time(&text, ty)?),
        PgType::Timestamp => Value::Timestamp(
            PrimitiveDateTime::parse(
                &text,
                format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"),
            )
            .map_err(|e| invalid(ty, e))?,
        ),
        PgType::TimestampTz => Value::TimestampTz(
            OffsetDateTime::parse(
                &text,
                format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][offset_hour sign:mandatory][optional [:[offset_minute]]]"
                ),
            )
            .map_err(|e| invalid(ty, e))?,
        ),
        PgType::TimeTz => {
            let Some(split) = text.rfind(['+', '-']) else {
                return Err(invalid(ty, "missing offset").into());
            };
            let time = parse_time(&text[..split], ty)?;
            let offset = UtcOffset::parse(
                &text[split..],
                format_description!("[offset_hour sign:mandatory][optional [:[offset_minute]]]"),
            )
            .map_err(|e| invalid(ty, e))?;
            Value::TimeTz(time, offset)
        }
        PgType::Text | PgType::Varchar | PgType::Unknown => Value::Text(text),
    };
    Ok(value)
}

fn parse_time(text: &str, ty: PgType) -> Result<Time, CodecError> {
    Time::parse(text, format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]")).map_err(|e| invalid(ty, e))
}

fn decode_hex(text: &str) -> Result<Bytes, CodecError> {
    let Some(hex) = text.strip_prefix("\\x") else {
        // escape format, taken verbatim
        return Ok(Bytes::copy_from_slice(text.as_bytes()));
    };
    if hex.len() % 2 != 0 {
        return Err(invalid(PgType::Bytea, "odd hex length"));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| invalid(PgType::Bytea, "invalid hex digit"))
        })
        .collect::<Result<Vec<u8>, _>>()
        .map(Bytes::from)
}

pub fn encode_text(value: &Value, buf: &mut BytesMut, charset: Charset) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => buf.put_u8(if *v { b't' } else { b'f' }),
        Value::Short(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
        Value::Int(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
        Value::Long(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
        Value::Int128(v) => buf.put_slice(itoa::Buffer::new().format(*v).as_bytes()),
        Value::Float(v) => put_float(buf, f64::from(*v), v.to_string()),
        Value::Double(v) => put_float(buf, *v, v.to_string()),
        Value::Text(text) => buf.put_slice(&charset.encode(text)?),
        Value::Bytes(bytes) => {
            const HEX: &[u8; 16] = b"0123456789abcdef";
            buf.put_slice(b"\\x");
            for byte in bytes {
                buf.put_u8(HEX[(byte >> 4) as usize]);
                buf.put_u8(HEX[(byte & 0xf) as usize]);
            }
        }
        Value::Date(date) => put_date(buf, *date),
        Value::Time(time) => put_time(buf, *time),
        Value::Timestamp(datetime) => {
            put_date(buf, datetime.date());
            buf.put_u8(b' ');
            put_time(buf, datetime.time());
        }
        Value::TimeTz(time, offset) => {
            put_time(buf, *time);
            put_offset(buf, *offset);
        }
        Value::TimestampTz(datetime) => {
            put_date(buf, datetime.date());
            buf.put_u8(b' ');
            put_time(buf, datetime.time());
            put_offset(buf, datetime.offset());
        }
    }
    Ok(())
}

fn put_float(buf: &mut BytesMut, value: f64, display: String) {
    if value.is_nan() {
        buf.put_slice(b"NaN");
    } else if value.is_infinite() {
        buf.put_slice(if value > 0.0 { &b"Infinity"[..] } else { b"-Infinity" });
    } else {
        buf.put_slice(display.as_bytes());
    }
}

fn put_padded(buf: &mut BytesMut, value: u32, width: usize) {
    let mut itoa = itoa::Buffer::new();
    let digits = itoa.format(value);
    buf.put_bytes(b'0', width.saturating_sub(digits.len()));
    buf.put_slice(digits.as_bytes());
}

fn put_date(buf: &mut BytesMut, date: Date) {
    if date.year() < 0 {
        buf.put_u8(b'-');
    }
    put_padded(buf, date.year().unsigned_abs(), 4);
    buf.put_u8(b'-');
    put_padded(buf, u8::from(date.month()).into(), 2);
    buf.put_u8(b'-');
    put_padded(buf, date.day().into(), 2);
}

fn put_time(buf: &mut BytesMut, time: Time) {
    put_padded(buf, time.hour().into(), 2);
    buf.put_u8(b':');
    put_padded(buf, time.minute().into(), 2);
    buf.put_u8(b':');
    put_padded(buf, time.second().into(), 2);

    let mut micros = time.microsecond();
    if micros != 0 {
        let mut width = 6;
        while micros % 10 == 0 {
            micros /= 10;
            width -= 1;
        }
        buf.put_u8(b'.');
        put_padded(buf, micros, width);
    }
}

fn put_offset(buf: &mut BytesMut, offset: UtcOffset) {
    buf.put_u8(if offset.is_negative() { b'-' } else { b'+' });
    put_padded(buf, offset.whole_hours().unsigned_abs().into(), 2);
    let minutes = offset.minutes_past_hour().unsigned_abs();
    let seconds = offset.seconds_past_minute().unsigned_abs();
    if minutes != 0 || seconds != 0 {
        buf.put_u8(b':');
        put_padded(buf, minutes.into(), 2);
    }
    if seconds != 0 {
        buf.put_u8(b':');
        put_padded(buf, seconds.into(), 2);
    }
}
