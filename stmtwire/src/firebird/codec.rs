//! XDR value codecs, one per [`ColumnType`].
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

use super::ColumnType;
use crate::{
    Result,
    codec::{BufMutExt, Charset, CodecError, FramingError, NullBitmap, Payload},
    pool::BufferPool,
    source::BlobStore,
    temporal,
    value::Value,
};

/// Everything a codec needs besides the bytes.
#[derive(Clone, Copy)]
pub struct CodecContext<'a> {
    pub charset: Charset,
    pub pool: &'a Arc<BufferPool>,
    pub blobs: Option<&'a dyn BlobStore>,
    pub max_blob_size: usize,
}

/// Decode and encode values of one [`ColumnType`].
pub trait Codec: Sync {
    fn decode(&self, payload: &mut Payload, cx: &CodecContext) -> Result<Value>;

    fn encode(&self, value: &Value, buf: &mut BytesMut, cx: &CodecContext) -> Result<()>;
}

/// Indexed by `ColumnType as usize`.
static CODECS: [&dyn Codec; ColumnType::COUNT] = [
    &TextCodec,
    &TextCodec,
    &TextCodec,
    &TextCodec,
    &NullCodec,
    &ShortCodec,
    &LongCodec,
    &Int64Codec,
    &Int64Codec,
    &Int128Codec,
    &BlobCodec,
    &Int64Codec,
    &FloatCodec,
    &DoubleCodec,
    &DoubleCodec,
    &DateCodec,
    &TimeCodec,
    &TimestampCodec,
    &TimeTzCodec,
    &TimestampTzCodec,
    &BooleanCodec,
];

/// Codec of a column type.
pub fn codec_for(ty: ColumnType) -> &'static dyn Codec {
    CODECS[ty as usize]
}

fn mismatch(ty: &'static str, value: &Value) -> CodecError {
    CodecError::invalid(ty, format!("cannot encode {} value", value.kind()))
}

fn integer<T: TryFrom<i64>>(ty: &'static str, value: &Value) -> Result<T, CodecError> {
    let wide = value.as_i64().ok_or_else(|| mismatch(ty, value))?;
    T::try_from(wide).map_err(|_| CodecError::invalid(ty, format!("{wide} out of range")))
}

struct TextCodec;

impl Codec for TextCodec {
    fn decode(&self, payload: &mut Payload, cx: &CodecContext) -> Result<Value> {
        payload.get_string(cx.charset)
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, cx: &CodecContext) -> Result<()> {
        match value {
            Value::Text(text) => buf.put_var_buffer(&cx.charset.encode(text)?),
            Value::Bytes(bytes) => buf.put_var_buffer(bytes),
            _ => return Err(mismatch("VARCHAR", value).into()),
        }
        Ok(())
    }
}

struct NullCodec;

impl Codec for NullCodec {
    fn decode(&self, _: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Null)
    }

    fn encode(&self, _: &Value, _: &mut BytesMut, _: &CodecContext) -> Result<()> {
        Ok(())
    }
}

/// XDR has no 16 bit integer, SMALLINT travels as 4 bytes.
struct ShortCodec;

impl Codec for ShortCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        let value = payload.get_i32()?;
        let value = i16::try_from(value)
            .map_err(|_| CodecError::invalid("SMALLINT", format!("{value} out of range")))?;
        Ok(Value::Short(value))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        buf.put_i32(integer::<i16>("SMALLINT", value)?.into());
        Ok(())
    }
}

struct LongCodec;

impl Codec for LongCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Int(payload.get_i32()?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        buf.put_i32(integer("INTEGER", value)?);
        Ok(())
    }
}

/// BIGINT, and the 8 byte ids of QUAD and ARRAY.
struct Int64Codec;

impl Codec for Int64Codec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Long(payload.get_i64()?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        buf.put_i64(integer("BIGINT", value)?);
        Ok(())
    }
}

struct Int128Codec;

impl Codec for Int128Codec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Int128(payload.get_i128()?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        let value = match *value {
            Value::Int128(v) => v,
            _ => integer::<i64>("INT128", value)?.into(),
        };
        buf.put_i128(value);
        Ok(())
    }
}

struct FloatCodec;

impl Codec for FloatCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Float(payload.get_f32()?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        match *value {
            Value::Float(v) => buf.put_f32(v),
            _ => return Err(mismatch("FLOAT", value).into()),
        }
        Ok(())
    }
}

/// DOUBLE PRECISION and D_FLOAT.
struct DoubleCodec;

impl Codec for DoubleCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Double(payload.get_f64()?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        match *value {
            Value::Double(v) => buf.put_f64(v),
            Value::Float(v) => buf.put_f64(v.into()),
            _ => return Err(mismatch("DOUBLE PRECISION", value).into()),
        }
        Ok(())
    }
}

struct DateCodec;

impl Codec for DateCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Date(temporal::decode_date(payload.get_i32()?)?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        match value {
            Value::Date(date) => buf.put_i32(temporal::encode_date(*date)),
            _ => return Err(mismatch("DATE", value).into()),
        }
        Ok(())
    }
}

struct TimeCodec;

impl Codec for TimeCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        Ok(Value::Time(temporal::decode_time(payload.get_u32()?)?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        match value {
            Value::Time(time) => buf.put_u32(temporal::encode_time(*time)),
            _ => return Err(mismatch("TIME", value).into()),
        }
        Ok(())
    }
}

struct TimestampCodec;

impl Codec for TimestampCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        // both fields checked before either is consumed
        let mut probe = payload.clone();
        let date = probe.get_i32()?;
        let time = probe.get_u32()?;
        *payload = probe;
        Ok(Value::Timestamp(temporal::decode_timestamp(date, time)?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        let Value::Timestamp(timestamp) = value else {
            return Err(mismatch("TIMESTAMP", value).into());
        };
        let (date, time) = temporal::encode_timestamp(*timestamp);
        buf.put_i32(date);
        buf.put_u32(time);
        Ok(())
    }
}

fn get_zone(payload: &mut Payload) -> Result<u16> {
    let zone = payload.get_u32()?;
    Ok(u16::try_from(zone).map_err(|_| CodecError::invalid("TIME ZONE", format!("zone id {zone}")))?)
}

/// Utc time and zone id, the zone id is padded to 4 bytes.
struct TimeTzCodec;

impl Codec for TimeTzCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        let mut probe = payload.clone();
        let time = probe.get_u32()?;
        let zone = get_zone(&mut probe)?;
        *payload = probe;
        let (time, offset) = temporal::decode_time_tz(time, zone)?;
        Ok(Value::TimeTz(time, offset))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        let Value::TimeTz(time, offset) = value else {
            return Err(mismatch("TIME WITH TIME ZONE", value).into());
        };
        let (time, zone) = temporal::encode_time_tz(*time, *offset);
        buf.put_u32(time);
        buf.put_u32(zone.into());
        Ok(())
    }
}

struct TimestampTzCodec;

impl Codec for TimestampTzCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        let mut probe = payload.clone();
        let date = probe.get_i32()?;
        let time = probe.get_u32()?;
        let zone = get_zone(&mut probe)?;
        *payload = probe;
        Ok(Value::TimestampTz(temporal::decode_timestamp_tz(date, time, zone)?))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        let Value::TimestampTz(timestamp) = value else {
            return Err(mismatch("TIMESTAMP WITH TIME ZONE", value).into());
        };
        let (date, time, zone) = temporal::encode_timestamp_tz(*timestamp)?;
        buf.put_i32(date);
        buf.put_u32(time);
        buf.put_u32(zone.into());
        Ok(())
    }
}

/// One byte padded to 4.
struct BooleanCodec;

impl Codec for BooleanCodec {
    fn decode(&self, payload: &mut Payload, _: &CodecContext) -> Result<Value> {
        let mut probe = payload.clone();
        let value = probe.get_u8()?;
        probe.skip_padding(1)?;
        *payload = probe;
        Ok(Value::Bool(value != 0))
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        let Value::Bool(value) = value else {
            return Err(mismatch("BOOLEAN", value).into());
        };
        buf.put_u8(*value as u8);
        buf.put_padding(1);
        Ok(())
    }
}

/// BLOB parameters carry an id, the content is resolved through the
/// [`BlobStore`]. A BLOB that cannot be resolved decodes as NULL.
struct BlobCodec;

impl Codec for BlobCodec {
    fn decode(&self, payload: &mut Payload, cx: &CodecContext) -> Result<Value> {
        let blob_id = payload.get_u64()?;

        let Some(segments) = cx.blobs.and_then(|blobs| blobs.segments(blob_id)) else {
            tracing::debug!(blob_id, "blob not found, decoded as null");
            return Ok(Value::Null);
        };

        match read_blob(segments, cx) {
            Ok(content) => Ok(Value::Bytes(content)),
            Err(err) => {
                tracing::debug!(blob_id, %err, "blob unreadable, decoded as null");
                Ok(Value::Null)
            }
        }
    }

    fn encode(&self, value: &Value, buf: &mut BytesMut, _: &CodecContext) -> Result<()> {
        buf.put_u64(integer::<i64>("BLOB", value)? as u64);
        Ok(())
    }
}

/// Reader of a BLOB segment stream.
///
/// Each segment is a 2 byte little endian length followed by its bytes.
#[derive(Debug)]
pub struct BlobSegments {
    payload: Payload,
}

impl BlobSegments {
    pub fn new(payload: Payload) -> BlobSegments {
        Self { payload }
    }

    pub fn next_segment(&mut self) -> Result<Option<Bytes>, FramingError> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        let mut probe = self.payload.clone();
        let len = probe.get_u16_le()?;
        let segment = probe.get_bytes(len.into())?;
        self.payload = probe;
        Ok(Some(segment))
    }
}

/// Assemble a segment stream in a pooled staging buffer.
fn read_blob(segments: Bytes, cx: &CodecContext) -> Result<Bytes> {
    let mut staging = cx.pool.acquire();
    let mut reader = BlobSegments::new(Payload::new(segments));

    while let Some(segment) = reader.next_segment()? {
        let size = staging.len() + segment.len();
        if size > cx.max_blob_size {
            return Err(CodecError::BlobTooLarge { size, limit: cx.max_blob_size }.into());
        }
        staging.put_slice(&segment);
    }

    Ok(Bytes::copy_from_slice(&staging))
}

/// Decode the parameter message of an execute.
///
/// Without a message there are no values. Otherwise a null bitmap padded to
/// 4 bytes precedes the values, a NULL position consumes no value bytes.
pub fn decode_parameters(
    payload: &mut Payload,
    types: &[ColumnType],
    message_count: u32,
    cx: &CodecContext,
) -> Result<Vec<Value>> {
    if message_count == 0 || types.is_empty() {
        return Ok(Vec::new());
    }

    let bitmap = NullBitmap::read(payload, types.len(), 0)?;
    payload.skip_padding(bitmap.as_bytes().len())?;

    let mut values = Vec::with_capacity(types.len());
    for (i, ty) in types.iter().enumerate() {
        if bitmap.is_null(i) {
            values.push(Value::Null);
            continue;
        }
        let value = codec_for(*ty)
            .decode(payload, cx)
            .map_err(|e| e.context(format!("parameter {i} {ty}")))?;
        values.push(value);
    }
    Ok(values)
}

/// Encode a parameter message, inverse of [`decode_parameters`].
pub fn encode_parameters(
    values: &[Value],
    types: &[ColumnType],
    buf: &mut BytesMut,
    cx: &CodecContext,
) -> Result<()> {
    if values.len() != types.len() {
        return Err(crate::codec::DescriptorError::CountMismatch {
            expected: types.len(),
            found: values.len(),
        }
        .into());
    }
    let bitmap = NullBitmap::from_values(values, 0);
    bitmap.write(&mut *buf);
    buf.put_padding(bitmap.as_bytes().len());
    for (value, ty) in values.iter().zip(types) {
        if !value.is_null() {
            codec_for(*ty).encode(value, buf, cx)?;
        }
    }
    Ok(())
}

/// Encode a result row, the wire type of each cell is its runtime type.
pub fn encode_row(row: &[Value], buf: &mut BytesMut, cx: &CodecContext) -> Result<()> {
    let bitmap = NullBitmap::from_values(row, 0);
    bitmap.write(&mut *buf);
    buf.put_padding(bitmap.as_bytes().len());
    for value in row.iter().filter(|v| !v.is_null()) {
        codec_for(ColumnType::from_kind(value.kind())).encode(value, buf, cx)?;
    }
    Ok(())
}

/// Decode a result row of known column types.
pub fn decode_row(payload: &mut Payload, types: &[ColumnType], cx: &CodecContext) -> Result<Vec<Value>> {
    decode_parameters(payload, types, 1, cx)
}
