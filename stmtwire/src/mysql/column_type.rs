use crate::{codec::DescriptorError, value::ValueKind};

macro_rules! column_types {
    ($($(#[$meta:meta])* $name:ident = $code:literal, $sql:literal;)*) => {
        /// MySQL column and parameter type codes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum ColumnType {
            $($(#[$meta])* $name = $code,)*
        }

        impl ColumnType {
            /// Map a type code.
            pub fn from_code(code: u8) -> Result<ColumnType, DescriptorError> {
                match code {
                    $($code => Ok(Self::$name),)*
                    tag => Err(DescriptorError::UnknownTypeTag { tag: tag.into() }),
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

column_types! {
    Decimal = 0x00, "DECIMAL";
    Tiny = 0x01, "TINYINT";
    Short = 0x02, "SMALLINT";
    Long = 0x03, "INT";
    Float = 0x04, "FLOAT";
    Double = 0x05, "DOUBLE";
    Null = 0x06, "NULL";
    Timestamp = 0x07, "TIMESTAMP";
    LongLong = 0x08, "BIGINT";
    Int24 = 0x09, "MEDIUMINT";
    Date = 0x0a, "DATE";
    Time = 0x0b, "TIME";
    DateTime = 0x0c, "DATETIME";
    Year = 0x0d, "YEAR";
    VarChar = 0x0f, "VARCHAR";
    Bit = 0x10, "BIT";
    Json = 0xf5, "JSON";
    NewDecimal = 0xf6, "DECIMAL";
    Enum = 0xf7, "ENUM";
    Set = 0xf8, "SET";
    TinyBlob = 0xf9, "TINYBLOB";
    MediumBlob = 0xfa, "MEDIUMBLOB";
    LongBlob = 0xfb, "LONGBLOB";
    Blob = 0xfc, "BLOB";
    VarString = 0xfd, "VARCHAR";
    String = 0xfe, "CHAR";
    Geometry = 0xff, "GEOMETRY";
}

impl ColumnType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Types sent as raw bytes instead of text.
    pub const fn is_binary(self) -> bool {
        matches!(
            self,
            Self::TinyBlob | Self::MediumBlob | Self::LongBlob | Self::Blob | Self::Bit | Self::Geometry
        )
    }

    /// Types sent as a length encoded string.
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            Self::Decimal
                | Self::NewDecimal
                | Self::VarChar
                | Self::Json
                | Self::Enum
                | Self::Set
                | Self::VarString
                | Self::String
        ) || self.is_binary()
    }

    /// Wire type of a result cell.
    pub const fn from_kind(kind: ValueKind) -> ColumnType {
        match kind {
            ValueKind::Null => Self::Null,
            ValueKind::Bool => Self::Tiny,
            ValueKind::Short => Self::Short,
            ValueKind::Int => Self::Long,
            ValueKind::Long => Self::LongLong,
            ValueKind::Int128 => Self::NewDecimal,
            ValueKind::Float => Self::Float,
            ValueKind::Double => Self::Double,
            ValueKind::Text => Self::VarString,
            ValueKind::Bytes => Self::Blob,
            ValueKind::Date => Self::Date,
            ValueKind::Time | ValueKind::TimeTz => Self::Time,
            ValueKind::Timestamp => Self::DateTime,
            ValueKind::TimestampTz => Self::Timestamp,
        }
    }

    /// Display width reported in column definitions.
    pub const fn column_length(self) -> u32 {
        match self {
            Self::Tiny => 4,
            Self::Short | Self::Year => 6,
            Self::Int24 => 9,
            Self::Long => 11,
            Self::LongLong => 20,
            Self::Float => 12,
            Self::Double => 22,
            Self::Date => 10,
            Self::Time => 17,
            Self::DateTime | Self::Timestamp => 26,
            Self::Decimal | Self::NewDecimal => 41,
            Self::Null => 0,
            _ => 0xff_ffff,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a bound parameter, as sent with `new-params-bound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterType {
    pub column_type: ColumnType,
    pub unsigned: bool,
}

impl ParameterType {
    /// Unsigned bit of the parameter flag byte.
    pub const UNSIGNED: u8 = 0x80;

    pub const fn new(column_type: ColumnType) -> Self {
        Self { column_type, unsigned: false }
    }

    /// Decode the 2 byte type and flag pair.
    pub fn from_pair(code: u8, flag: u8) -> Result<ParameterType, DescriptorError> {
        Ok(Self { column_type: ColumnType::from_code(code)?, unsigned: flag & Self::UNSIGNED != 0 })
    }

    pub const fn to_pair(self) -> [u8; 2] {
        [self.column_type.code(), if self.unsigned { Self::UNSIGNED } else { 0 }]
    }
}
