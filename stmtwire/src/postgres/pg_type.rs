use crate::value::ValueKind;

pub type Oid = u32;

macro_rules! pg_types {
    ($($(#[$meta:meta])* $name:ident = $oid:literal, $len:literal, $sql:literal;)*) => {
        /// Builtin types the engine can encode and decode.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum PgType {
            $($(#[$meta])* $name,)*
        }

        impl PgType {
            /// Map an oid, `None` for types outside the builtin set.
            pub fn from_oid(oid: Oid) -> Option<PgType> {
                match oid {
                    $($oid => Some(Self::$name),)*
                    _ => None,
                }
            }

            pub const fn oid(self) -> Oid {
                match self {
                    $(Self::$name => $oid,)*
                }
            }

            /// `typlen` reported in row descriptions, `-1` for varlena.
            pub const fn typlen(self) -> i16 {
                match self {
                    $(Self::$name => $len,)*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $sql,)*
                }
            }
        }
    };
}

pg_types! {
    Bool = 16, 1, "bool";
    Bytea = 17, -1, "bytea";
    Int8 = 20, 8, "int8";
    Int2 = 21, 2, "int2";
    Int4 = 23, 4, "int4";
    Text = 25, -1, "text";
    Float4 = 700, 4, "float4";
    Float8 = 701, 8, "float8";
    /// Untyped literal, treated as text.
    Unknown = 705, -2, "unknown";
    Varchar = 1043, -1, "varchar";
    Date = 1082, 4, "date";
    Time = 1083, 8, "time";
    Timestamp = 1114, 8, "timestamp";
    TimestampTz = 1184, 8, "timestamptz";
    TimeTz = 1266, 12, "timetz";
    Numeric = 1700, -1, "numeric";
}

impl PgType {
    /// Wire type of a result cell.
    pub const fn from_kind(kind: ValueKind) -> PgType {
        match kind {
            ValueKind::Null | ValueKind::Text => Self::Text,
            ValueKind::Bool => Self::Bool,
            ValueKind::Short => Self::Int2,
            ValueKind::Int => Self::Int4,
            ValueKind::Long => Self::Int8,
            ValueKind::Int128 => Self::Numeric,
            ValueKind::Float => Self::Float4,
            ValueKind::Double => Self::Float8,
            ValueKind::Bytes => Self::Bytea,
            ValueKind::Date => Self::Date,
            ValueKind::Time => Self::Time,
            ValueKind::Timestamp => Self::Timestamp,
            ValueKind::TimeTz => Self::TimeTz,
            ValueKind::TimestampTz => Self::TimestampTz,
        }
    }

    /// Type of a parameter declared with `oid`, `0` leaves it to `fallback`.
    ///
    /// Types outside the builtin set are received as text.
    pub fn resolve(oid: Oid, fallback: Option<ValueKind>) -> PgType {
        match (oid, fallback) {
            (0, Some(kind)) => Self::from_kind(kind),
            (0, None) => Self::Unknown,
            (oid, _) => Self::from_oid(oid).unwrap_or(Self::Text),
        }
    }
}

impl std::fmt::Display for PgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
