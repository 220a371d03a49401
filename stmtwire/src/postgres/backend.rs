//! Postgres Backend Messages of the extended query protocol.
use bytes::{BufMut, BytesMut};

use super::{PgFormat, PgType, codec};
use crate::{
    Error, Result,
    codec::{BufMutExt, Charset, CodecError},
    fetch::{FetchEnd, FetchProtocol},
    source::ColumnDef,
    value::Value,
};

/// Write a backend message to `buf`.
///
/// The length is patched in after the body, on error nothing is left in
/// `buf`.
pub fn write<B: BackendProtocol>(msg: &B, buf: &mut BytesMut) -> Result<()> {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let offset = buf.len();
    buf.put_u8(B::MSGTYPE);
    buf.put_u32(0);

    if let Err(err) = msg.encode(buf) {
        buf.truncate(offset);
        return Err(err);
    }

    // the length counts itself but not the message type
    let len = buf.len() - offset - 1;
    let Ok(len) = i32::try_from(len) else {
        buf.truncate(offset);
        return Err(CodecError::invalid("message", format!("body of {len} bytes")).into());
    };
    buf[offset + 1..offset + PREFIX].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// A type which can be encoded into postgres backend message
pub trait BackendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Write the body of the message.
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;
}

macro_rules! empty_message {
    ($($(#[$meta:meta])* $name:ident = $msgtype:literal;)*) => {$(
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name;

        impl BackendProtocol for $name {
            const MSGTYPE: u8 = $msgtype;

            fn encode(&self, _: &mut BytesMut) -> Result<()> {
                Ok(())
            }
        }
    )*};
}

empty_message! {
    /// Identifies the message as a Parse-complete indicator.
    ParseComplete = b'1';
    /// Identifies the message as a Bind-complete indicator.
    BindComplete = b'2';
    /// Identifies the message as a Close-complete indicator.
    CloseComplete = b'3';
    /// Identifies the message as a no-data indicator.
    NoData = b'n';
    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    PortalSuspended = b's';
}

fn count(len: usize) -> Result<i16> {
    Ok(i16::try_from(len).map_err(|_| CodecError::invalid("message", format!("{len} fields")))?)
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription<'a> {
    pub types: &'a [PgType],
}

impl BackendProtocol for ParameterDescription<'_> {
    const MSGTYPE: u8 = b't';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(count(self.types.len())?);
        for ty in self.types {
            buf.put_u32(ty.oid());
        }
        Ok(())
    }
}

/// Identifies the message as a row description.
#[derive(Debug)]
pub struct RowDescription<'a> {
    pub columns: &'a [ColumnDef],
    /// Format of each column, missing formats are text.
    pub formats: &'a [PgFormat],
}

impl BackendProtocol for RowDescription<'_> {
    const MSGTYPE: u8 = b'T';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(count(self.columns.len())?);
        for (i, column) in self.columns.iter().enumerate() {
            let ty = PgType::from_kind(column.kind);
            buf.put_nul_string(&column.name);
            // table oid, attribute number
            buf.put_u32(0);
            buf.put_i16(0);
            buf.put_u32(ty.oid());
            buf.put_i16(ty.typlen());
            // type modifier
            buf.put_i32(-1);
            buf.put_u16(self.formats.get(i).copied().unwrap_or_default().format_code());
        }
        Ok(())
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow<'a> {
    pub row: &'a [Value],
    pub formats: &'a [PgFormat],
    pub charset: Charset,
}

impl BackendProtocol for DataRow<'_> {
    const MSGTYPE: u8 = b'D';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(count(self.row.len())?);
        for (i, value) in self.row.iter().enumerate() {
            if value.is_null() {
                buf.put_i32(-1);
                continue;
            }

            let offset = buf.len();
            buf.put_i32(0);
            let format = self.formats.get(i).copied().unwrap_or_default();
            codec::encode(value, format, buf, self.charset)
                .map_err(|e| e.context(format!("column {i} {}", value.kind())))?;

            let len = buf.len() - offset - 4;
            let len = i32::try_from(len).map_err(|_| CodecError::invalid("column", format!("{len} bytes")))?;
            buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete<'a> {
    /// Command keyword, e.g. `SELECT`.
    pub tag: &'a str,
    /// Rows processed, omitted for commands that do not count rows.
    pub rows: Option<u64>,
}

impl BackendProtocol for CommandComplete<'_> {
    const MSGTYPE: u8 = b'C';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(self.tag.as_bytes());
        if let Some(rows) = self.rows {
            // the oid field of INSERT is always 0
            if self.tag == "INSERT" {
                buf.put_slice(b" 0");
            }
            buf.put_u8(b' ');
            buf.put_slice(itoa::Buffer::new().format(rows).as_bytes());
        }
        buf.put_u8(b'\0');
        Ok(())
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    pub status: u8,
}

impl ReadyForQuery {
    /// Not in a transaction block.
    pub const IDLE: ReadyForQuery = ReadyForQuery { status: b'I' };
}

impl BackendProtocol for ReadyForQuery {
    const MSGTYPE: u8 = b'Z';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.status);
        Ok(())
    }
}

/// Identifies the message as an error.
#[derive(Debug)]
pub struct ErrorResponse {
    pub severity: &'static str,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn from_error(err: &Error) -> ErrorResponse {
        let severity = match err.is_connection_fatal() {
            true => "FATAL",
            false => "ERROR",
        };
        Self { severity, code: err.sqlstate().to_owned(), message: err.message() }
    }
}

impl BackendProtocol for ErrorResponse {
    const MSGTYPE: u8 = b'E';

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        for (field, value) in [
            (b'S', self.severity),
            (b'V', self.severity),
            (b'C', self.code.as_str()),
            (b'M', self.message.as_str()),
        ] {
            buf.put_u8(field);
            buf.put_nul_string(value);
        }
        buf.put_u8(b'\0');
        Ok(())
    }
}

/// DataRow messages of one Execute.
///
/// A batch cut short by the row limit ends with [`PortalSuspended`], an
/// exhausted portal with the command tag and the rows of this batch.
pub struct PortalRows<'a> {
    formats: &'a [PgFormat],
    charset: Charset,
    tag: &'a str,
}

impl<'a> PortalRows<'a> {
    pub fn new(formats: &'a [PgFormat], charset: Charset, tag: &'a str) -> Self {
        Self { formats, charset, tag }
    }
}

impl FetchProtocol for PortalRows<'_> {
    fn encode_row(&mut self, row: &[Value], out: &mut BytesMut) -> Result<()> {
        write(&DataRow { row, formats: self.formats, charset: self.charset }, out)
    }

    fn encode_end(&mut self, end: FetchEnd, rows: u32, out: &mut BytesMut) -> Result<()> {
        match end {
            FetchEnd::More => write(&PortalSuspended, out),
            FetchEnd::Exhausted | FetchEnd::Absent => {
                write(&CommandComplete { tag: self.tag, rows: Some(rows.into()) }, out)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{statement::LookupError, value::ValueKind};

    #[test]
    fn framing() {
        let mut buf = BytesMut::new();
        write(&ParseComplete, &mut buf).unwrap();
        write(&ReadyForQuery::IDLE, &mut buf).unwrap();
        assert_eq!(&buf[..], b"1\0\0\0\x04Z\0\0\0\x05I");
    }

    #[test]
    fn row_description() {
        let columns = [ColumnDef::new("id", ValueKind::Int), ColumnDef::new("name", ValueKind::Text)];
        let mut buf = BytesMut::new();
        write(&RowDescription { columns: &columns, formats: &[PgFormat::Binary] }, &mut buf).unwrap();

        let mut expected = BytesMut::new();
        expected.put_u8(b'T');
        expected.put_u32(4 + 2 + (3 + 18) + (5 + 18));
        expected.put_i16(2);
        expected.put_slice(b"id\0\0\0\0\0\0\0\0\0\0\x17\0\x04\xff\xff\xff\xff\0\x01");
        expected.put_slice(b"name\0\0\0\0\0\0\0\0\0\0\x19\xff\xff\xff\xff\xff\xff\0\0");
        assert_eq!(buf, expected);
    }

    #[test]
    fn data_row() {
        let mut buf = BytesMut::new();
        let row = [Value::Int(7), Value::Null, Value::from("ab")];
        let formats = [PgFormat::Binary, PgFormat::Binary, PgFormat::Text];
        write(&DataRow { row: &row, formats: &formats, charset: Charset::Utf8 }, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            b"D\0\0\0\x18\0\x03\0\0\0\x04\0\0\0\x07\xff\xff\xff\xff\0\0\0\x02ab"
        );

        // unencodable text leaves nothing behind
        let mut buf = BytesMut::from(&b"x"[..]);
        let row = [Value::from("\u{20ac}")];
        let err = write(&DataRow { row: &row, formats: &[], charset: Charset::Latin1 }, &mut buf).unwrap_err();
        assert!(!err.is_connection_fatal());
        assert_eq!(&buf[..], b"x");
    }

    #[test]
    fn command_complete() {
        let mut buf = BytesMut::new();
        write(&CommandComplete { tag: "SELECT", rows: Some(12) }, &mut buf).unwrap();
        write(&CommandComplete { tag: "INSERT", rows: Some(1) }, &mut buf).unwrap();
        write(&CommandComplete { tag: "CREATE", rows: None }, &mut buf).unwrap();
        assert_eq!(&buf[..], b"C\0\0\0\x0eSELECT 12\0C\0\0\0\x0fINSERT 0 1\0C\0\0\0\x0bCREATE\0");
    }

    #[test]
    fn error_response() {
        let err = Error::from(LookupError::UnknownPortal("p1".into()));
        let mut buf = BytesMut::new();
        write(&ErrorResponse::from_error(&err), &mut buf).unwrap();
        let body = &buf[5..];
        assert_eq!(body, b"SERROR\0VERROR\0C34000\0Mportal \"p1\" does not exist\0\0");
    }
}
