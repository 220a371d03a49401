use crate::{codec::DescriptorError, value::ValueKind};

/// Firebird parameter and column types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `CHAR` with charset, `blr_text2`.
    Text,
    /// `VARCHAR` with charset, `blr_varying2`.
    Varying,
    /// `CHAR` without charset, `blr_text`.
    LegacyText,
    /// `VARCHAR` without charset, `blr_varying`.
    LegacyVarying,
    /// Untyped NULL, has no BLR tag.
    Null,
    Short,
    Long,
    Quad,
    Int64,
    Int128,
    /// BLOB id resolved into its content.
    Blob,
    /// Array id, has no BLR tag of its own.
    Array,
    Float,
    Double,
    DFloat,
    Date,
    Time,
    Timestamp,
    TimeTz,
    TimestampTz,
    Boolean,
}

#[derive(Clone, Copy)]
struct Info {
    tag: Option<u8>,
    sql_type: u16,
    skip: u8,
    name: &'static str,
}

macro_rules! info {
    ($tag:expr, $sql_type:literal, $skip:literal, $name:literal) => {
        Info { tag: $tag, sql_type: $sql_type, skip: $skip, name: $name }
    };
}

/// Indexed by `ColumnType as usize`.
const INFO: [Info; ColumnType::COUNT] = [
    info!(Some(15), 452, 4, "CHAR"),
    info!(Some(38), 448, 4, "VARCHAR"),
    info!(Some(14), 452, 2, "CHAR"),
    info!(Some(37), 448, 2, "VARCHAR"),
    info!(None, 32766, 2, "NULL"),
    info!(Some(7), 500, 1, "SMALLINT"),
    info!(Some(8), 496, 1, "INTEGER"),
    info!(Some(9), 550, 1, "QUAD"),
    info!(Some(16), 580, 1, "BIGINT"),
    info!(Some(26), 32752, 1, "INT128"),
    info!(Some(17), 520, 1, "BLOB"),
    info!(None, 540, 1, "ARRAY"),
    info!(Some(10), 482, 0, "FLOAT"),
    info!(Some(27), 480, 0, "DOUBLE PRECISION"),
    info!(Some(11), 530, 0, "D_FLOAT"),
    info!(Some(12), 570, 0, "DATE"),
    info!(Some(13), 560, 0, "TIME"),
    info!(Some(35), 510, 0, "TIMESTAMP"),
    info!(Some(28), 32756, 0, "TIME WITH TIME ZONE"),
    info!(Some(29), 32754, 0, "TIMESTAMP WITH TIME ZONE"),
    info!(Some(23), 32764, 0, "BOOLEAN"),
];

static BY_TAG: [Option<ColumnType>; 256] = {
    let mut table = [None; 256];
    let mut i = 0;
    while i < ColumnType::COUNT {
        if let Some(tag) = INFO[i].tag {
            table[tag as usize] = Some(ColumnType::ALL[i]);
        }
        i += 1;
    }
    table
};

impl ColumnType {
    pub const COUNT: usize = 21;

    /// Every type, in declaration order.
    pub const ALL: [ColumnType; ColumnType::COUNT] = [
        ColumnType::Text,
        ColumnType::Varying,
        ColumnType::LegacyText,
        ColumnType::LegacyVarying,
        ColumnType::Null,
        ColumnType::Short,
        ColumnType::Long,
        ColumnType::Quad,
        ColumnType::Int64,
        ColumnType::Int128,
        ColumnType::Blob,
        ColumnType::Array,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::DFloat,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::Timestamp,
        ColumnType::TimeTz,
        ColumnType::TimestampTz,
        ColumnType::Boolean,
    ];

    const fn info(self) -> Info {
        INFO[self as usize]
    }

    /// Map BLR type tag.
    pub fn from_tag(tag: u8) -> Result<ColumnType, DescriptorError> {
        BY_TAG[tag as usize].ok_or(DescriptorError::UnknownTypeTag { tag: tag.into() })
    }

    /// BLR type tag, `None` for types that never appear in a BLR message.
    pub const fn tag(self) -> Option<u8> {
        self.info().tag
    }

    /// Bytes of inline BLR arguments following the tag.
    pub const fn skip_count(self) -> usize {
        self.info().skip as usize
    }

    /// `SQL_*` type code, without the nullable bit.
    pub const fn sql_type(self) -> u16 {
        self.info().sql_type
    }

    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// Text types, sent as length prefixed buffer.
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::Text | Self::Varying | Self::LegacyText | Self::LegacyVarying)
    }

    /// Wire type of a result cell.
    pub const fn from_kind(kind: ValueKind) -> ColumnType {
        match kind {
            ValueKind::Null => Self::Null,
            ValueKind::Bool => Self::Boolean,
            ValueKind::Short => Self::Short,
            ValueKind::Int => Self::Long,
            ValueKind::Long => Self::Int64,
            ValueKind::Int128 => Self::Int128,
            ValueKind::Float => Self::Float,
            ValueKind::Double => Self::Double,
            ValueKind::Text | ValueKind::Bytes => Self::Varying,
            ValueKind::Date => Self::Date,
            ValueKind::Time => Self::Time,
            ValueKind::Timestamp => Self::Timestamp,
            ValueKind::TimeTz => Self::TimeTz,
            ValueKind::TimestampTz => Self::TimestampTz,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
