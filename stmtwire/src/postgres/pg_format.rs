use crate::codec::DescriptorError;

/// Postgres data transmission format.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// There is no trailing null character, and embedded nulls are not
    /// allowed.
    #[default]
    Text,
    /// Binary has format code one.
    ///
    /// Integers use network byte order.
    Binary,
}

impl PgFormat {
    pub fn from_code(code: u16) -> Result<PgFormat, DescriptorError> {
        match code {
            0 => Ok(PgFormat::Text),
            1 => Ok(PgFormat::Binary),
            tag => Err(DescriptorError::UnknownTypeTag { tag: tag.into() }),
        }
    }

    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Expand the format codes of a Bind message to one format per value.
    ///
    /// No code means all text, a single code applies to every value,
    /// otherwise there must be one code per value.
    pub fn expand(formats: &[PgFormat], len: usize) -> Result<Vec<PgFormat>, DescriptorError> {
        match formats {
            [] => Ok(vec![PgFormat::Text; len]),
            [format] => Ok(vec![*format; len]),
            formats if formats.len() == len => Ok(formats.to_vec()),
            formats => Err(DescriptorError::CountMismatch { expected: len, found: formats.len() }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expand() {
        use PgFormat::*;
        assert_eq!(PgFormat::expand(&[], 2).unwrap(), [Text, Text]);
        assert_eq!(PgFormat::expand(&[Binary], 3).unwrap(), [Binary, Binary, Binary]);
        assert_eq!(PgFormat::expand(&[Binary, Text], 2).unwrap(), [Binary, Text]);
        assert!(PgFormat::expand(&[Binary, Text], 3).is_err());
        assert!(PgFormat::from_code(2).is_err());
    }
}
