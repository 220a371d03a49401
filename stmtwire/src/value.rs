//! Runtime typed cell exchanged with the sql execution collaborator.
use bytes::Bytes;
use std::fmt;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::common::ByteStr;

/// A decoded parameter or a result cell.
///
/// The variant is the runtime type of the cell, each dialect picks its wire
/// type from it when encoding rows.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Int128(i128),
    Float(f32),
    Double(f64),
    Text(ByteStr),
    Bytes(Bytes),
    Date(Date),
    Time(Time),
    Timestamp(PrimitiveDateTime),
    /// Local time with its offset.
    TimeTz(Time, UtcOffset),
    TimestampTz(OffsetDateTime),
}

/// Runtime type tag of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Short,
    Int,
    Long,
    Int128,
    Float,
    Double,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    TimeTz,
    TimestampTz,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Short(_) => ValueKind::Short,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Int128(_) => ValueKind::Int128,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::TimeTz(..) => ValueKind::TimeTz,
            Value::TimestampTz(_) => ValueKind::TimestampTz,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value widened to `i64`, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(b as i64),
            Value::Short(v) => Some(v.into()),
            Value::Int(v) => Some(v.into()),
            Value::Long(v) => Some(v),
            Value::Int128(v) => v.try_into().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

macro_rules! from {
    ($($ty:ty => $variant:ident,)*) => {$(
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        }
    )*};
}

from! {
    bool => Bool,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    i128 => Int128,
    f32 => Float,
    f64 => Double,
    &'static str => Text,
    String => Text,
    ByteStr => Text,
    Bytes => Bytes,
    Date => Date,
    Time => Time,
    PrimitiveDateTime => Timestamp,
    OffsetDateTime => TimestampTz,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
