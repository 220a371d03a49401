//! MySQL statement commands and their responses.
//!
//! Commands arrive as the payload of one packet, the command byte first.
//! Responses are written as complete packets: 3 byte little endian payload
//! length, sequence id, payload.
use bytes::{BufMut, Bytes, BytesMut};

use super::{codec::encode_row, *};
use crate::{
    Error, ErrorKind, Result,
    codec::{BufMutExt, Charset, CodecError, FramingError, Payload},
    common::{ByteStr, verbose},
    fetch::{FetchEnd, FetchProtocol},
    source::ColumnDef,
    statement::StatementId,
    value::Value,
};
#[cfg(feature = "verbose")]
use crate::ext::FmtExt;

/// Write one packet whose payload is written by `f`.
///
/// On error nothing is left in `out` and `seq` is unchanged.
pub fn write_packet(
    out: &mut BytesMut,
    seq: &mut u8,
    f: impl FnOnce(&mut BytesMut) -> Result<()>,
) -> Result<()> {
    // payload length + sequence id
    const PREFIX: usize = 4;

    let offset = out.len();
    out.put_bytes(0, PREFIX);

    if let Err(err) = f(out) {
        out.truncate(offset);
        return Err(err);
    }

    let len = out.len() - offset - PREFIX;
    if len >= MAX_PAYLOAD_LEN {
        out.truncate(offset);
        return Err(CodecError::invalid("packet", format!("payload of {len} bytes")).into());
    }

    out[offset..offset + 3].copy_from_slice(&(len as u32).to_le_bytes()[..3]);
    out[offset + 3] = *seq;
    *seq = seq.wrapping_add(1);
    Ok(())
}

/// Statement commands sent by the client.
#[derive(Debug)]
pub enum Request {
    /// `COM_STMT_PREPARE`
    Prepare { sql: ByteStr },
    /// `COM_STMT_EXECUTE`
    Execute(Execute),
    /// `COM_STMT_FETCH`
    Fetch { statement_id: StatementId, rows: u32 },
    /// `COM_STMT_CLOSE`, answered with nothing.
    Close { statement_id: StatementId },
    /// `COM_STMT_RESET`
    Reset { statement_id: StatementId },
}

impl Request {
    /// Decode a command packet payload.
    pub fn decode(payload: Bytes, charset: Charset) -> Result<Request> {
        let mut payload = Payload::new(payload);
        let command = payload.get_u8()?;
        verbose!(command, body = %payload.chunk().lossy(), "mysql request");

        let request = match command {
            COM_STMT_PREPARE => {
                let sql = match charset.decode(payload.into_bytes())? {
                    Value::Text(sql) => sql,
                    Value::Bytes(raw) => ByteStr::from_utf8(raw)?,
                    _ => ByteStr::default(),
                };
                Self::Prepare { sql }
            }
            COM_STMT_EXECUTE => Self::Execute(Execute::decode(payload)?),
            COM_STMT_FETCH => Self::Fetch {
                statement_id: StatementId(payload.get_u32_le()?),
                rows: payload.get_u32_le()?,
            },
            COM_STMT_CLOSE => Self::Close { statement_id: StatementId(payload.get_u32_le()?) },
            COM_STMT_RESET => Self::Reset { statement_id: StatementId(payload.get_u32_le()?) },
            code => return Err(FramingError::UnknownCommand { dialect: "mysql", code: code.into() }.into()),
        };
        Ok(request)
    }
}

/// `COM_STMT_EXECUTE` header.
///
/// The parameter block can only be decoded with the parameter count of the
/// statement, see [`decode_parameters`][super::codec::decode_parameters].
#[derive(Debug)]
pub struct Execute {
    pub statement_id: StatementId,
    pub flags: u8,
    pub iteration_count: u32,
    pub parameters: Payload,
}

impl Execute {
    fn decode(mut payload: Payload) -> Result<Self> {
        Ok(Self {
            statement_id: StatementId(payload.get_u32_le()?),
            flags: payload.get_u8()?,
            iteration_count: payload.get_u32_le()?,
            parameters: payload,
        })
    }

    /// Client asked for a read only cursor.
    pub fn cursor(&self) -> bool {
        self.flags & CURSOR_TYPE_READ_ONLY != 0
    }
}

/// `OK_Packet`
#[derive(Debug, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x00);
        buf.put_lenenc_int(self.affected_rows);
        buf.put_lenenc_int(self.last_insert_id);
        buf.put_u16_le(self.status);
        buf.put_u16_le(self.warnings);
    }
}

/// `EOF_Packet`
#[derive(Debug, Default)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: u16,
}

impl EofPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0xfe);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status);
    }
}

/// `ERR_Packet`
#[derive(Debug)]
pub struct ErrPacket {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

impl ErrPacket {
    pub fn from_error(err: &Error) -> ErrPacket {
        let code = match err.kind() {
            ErrorKind::Lookup(_) => ER_UNKNOWN_STMT_HANDLER,
            _ => ER_UNKNOWN_ERROR,
        };
        Self { code, sqlstate: err.sqlstate().to_owned(), message: err.message() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0xff);
        buf.put_u16_le(self.code);
        buf.put_u8(b'#');
        // sqlstate is always 5 characters
        let mut sqlstate = [b'0'; 5];
        for (slot, byte) in sqlstate.iter_mut().zip(self.sqlstate.bytes()) {
            *slot = byte;
        }
        buf.put_slice(&sqlstate);
        buf.put_slice(self.message.as_bytes());
    }
}

/// `COM_STMT_PREPARE_OK`
#[derive(Debug)]
pub struct PrepareOk {
    pub statement_id: StatementId,
    pub columns: u16,
    pub params: u16,
    pub warnings: u16,
}

impl PrepareOk {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x00);
        buf.put_u32_le(self.statement_id.0);
        buf.put_u16_le(self.columns);
        buf.put_u16_le(self.params);
        buf.put_u8(0);
        buf.put_u16_le(self.warnings);
    }
}

/// `Protocol::ColumnDefinition41`
#[derive(Debug)]
pub struct ColumnDefinition<'a> {
    pub name: &'a str,
    pub column_type: ColumnType,
    pub charset: Charset,
}

impl<'a> ColumnDefinition<'a> {
    pub fn new(def: &'a ColumnDef, charset: Charset) -> Self {
        Self { name: &def.name, column_type: ColumnType::from_kind(def.kind), charset }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let binary = !self.column_type.is_string() || self.column_type.is_binary();
        // binary collation for everything but text
        let collation = match binary {
            true => Charset::Octets.mysql_collation(),
            false => self.charset.mysql_collation(),
        };
        let flags = match binary {
            true => BINARY_FLAG,
            false => 0,
        };

        buf.put_lenenc_bytes(b"def");
        // schema, table, original table
        buf.put_lenenc_bytes(b"");
        buf.put_lenenc_bytes(b"");
        buf.put_lenenc_bytes(b"");
        buf.put_lenenc_bytes(self.name.as_bytes());
        buf.put_lenenc_bytes(self.name.as_bytes());
        buf.put_lenenc_int(0x0c);
        buf.put_u16_le(collation);
        buf.put_u32_le(self.column_type.column_length());
        buf.put_u8(self.column_type.code());
        buf.put_u16_le(flags);
        buf.put_u8(0);
        buf.put_reserved(2);
    }
}

/// Write column definitions followed by an EOF, nothing when `defs` is empty.
pub fn write_definitions(
    out: &mut BytesMut,
    seq: &mut u8,
    defs: &[ColumnDef],
    charset: Charset,
    status: u16,
) -> Result<()> {
    if defs.is_empty() {
        return Ok(());
    }
    for def in defs {
        write_packet(out, seq, |buf| {
            ColumnDefinition::new(def, charset).encode(buf);
            Ok(())
        })?;
    }
    write_packet(out, seq, |buf| {
        EofPacket { warnings: 0, status }.encode(buf);
        Ok(())
    })
}

/// Binary result rows of one fetch batch, each row its own packet.
///
/// A streamed result ends with a plain EOF. A cursor batch ends with an EOF
/// flagged [`SERVER_STATUS_CURSOR_EXISTS`], plus
/// [`SERVER_STATUS_LAST_ROW_SENT`] once the cursor ran out.
pub struct BinaryRows<'a> {
    seq: &'a mut u8,
    charset: Charset,
    cursor: bool,
}

impl<'a> BinaryRows<'a> {
    pub fn new(seq: &'a mut u8, charset: Charset, cursor: bool) -> Self {
        Self { seq, charset, cursor }
    }
}

impl FetchProtocol for BinaryRows<'_> {
    fn encode_row(&mut self, row: &[Value], out: &mut BytesMut) -> Result<()> {
        let charset = self.charset;
        write_packet(out, self.seq, |buf| encode_row(row, buf, charset))
    }

    fn encode_end(&mut self, end: FetchEnd, _: u32, out: &mut BytesMut) -> Result<()> {
        let status = match (self.cursor, end) {
            (false, _) => SERVER_STATUS_AUTOCOMMIT,
            (true, FetchEnd::More) => SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS,
            (true, FetchEnd::Exhausted | FetchEnd::Absent) => {
                SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS | SERVER_STATUS_LAST_ROW_SENT
            }
        };
        write_packet(out, self.seq, |buf| {
            EofPacket { warnings: 0, status }.encode(buf);
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{statement::LookupError, value::ValueKind};

    #[test]
    fn framing() {
        let mut out = BytesMut::new();
        let mut seq = 1;
        write_packet(&mut out, &mut seq, |buf| {
            EofPacket { warnings: 0, status: SERVER_STATUS_AUTOCOMMIT }.encode(buf);
            Ok(())
        })
        .unwrap();
        assert_eq!(&out[..], &[5, 0, 0, 1, 0xfe, 0, 0, 2, 0]);
        assert_eq!(seq, 2);

        let err = write_packet(&mut out, &mut seq, |buf| {
            buf.put_u8(1);
            Err(CodecError::invalid("test", "fail").into())
        });
        assert!(err.is_err());
        assert_eq!(out.len(), 9);
        assert_eq!(seq, 2);
    }

    #[test]
    fn decode_commands() {
        let execute = Bytes::from_static(&[0x17, 5, 0, 0, 0, 1, 1, 0, 0, 0, 0xaa]);
        let Request::Execute(execute) = Request::decode(execute, Charset::Utf8).unwrap() else {
            panic!("expected execute");
        };
        assert_eq!(execute.statement_id, StatementId(5));
        assert!(execute.cursor());
        assert_eq!(execute.iteration_count, 1);
        assert_eq!(execute.parameters.chunk(), &[0xaa]);

        let prepare = Bytes::from_static(b"\x16select ?");
        assert!(matches!(
            Request::decode(prepare, Charset::Utf8).unwrap(),
            Request::Prepare { sql } if sql == "select ?"
        ));

        let fetch = Bytes::from_static(&[0x1c, 5, 0, 0, 0, 3, 0, 0, 0]);
        assert!(matches!(
            Request::decode(fetch, Charset::Utf8).unwrap(),
            Request::Fetch { statement_id: StatementId(5), rows: 3 }
        ));

        let err = Request::decode(Bytes::from_static(&[0x03, b'x']), Charset::Utf8).unwrap_err();
        assert!(err.is_connection_fatal());
        let err = Request::decode(Bytes::from_static(&[0x19, 5]), Charset::Utf8).unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn err_packet() {
        let err = Error::from(LookupError::UnknownStatement(StatementId(9)));
        let mut buf = BytesMut::new();
        ErrPacket::from_error(&err).encode(&mut buf);
        assert_eq!(&buf[..9], b"\xff\xdb\x04#26000");
        assert_eq!(&buf[9..], b"unknown statement 9");
    }

    #[test]
    fn column_definition() {
        let def = ColumnDef::new("id", ValueKind::Int);
        let mut buf = BytesMut::new();
        ColumnDefinition::new(&def, Charset::Utf8).encode(&mut buf);
        let mut payload = Payload::new(buf.freeze());
        assert_eq!(&payload.get_lenenc_bytes().unwrap()[..], b"def");
        for _ in 0..3 {
            assert!(payload.get_lenenc_bytes().unwrap().is_empty());
        }
        assert_eq!(&payload.get_lenenc_bytes().unwrap()[..], b"id");
        assert_eq!(&payload.get_lenenc_bytes().unwrap()[..], b"id");
        assert_eq!(payload.get_lenenc_int().unwrap(), 0x0c);
        assert_eq!(payload.get_u16_le().unwrap(), 63);
        assert_eq!(payload.get_u32_le().unwrap(), 11);
        assert_eq!(payload.get_u8().unwrap(), ColumnType::Long.code());
        assert_eq!(payload.get_u16_le().unwrap(), BINARY_FLAG);
        assert_eq!(payload.remaining(), 3);
    }

    #[test]
    fn cursor_eof_status() {
        let mut out = BytesMut::new();
        let mut seq = 0;
        let mut rows = BinaryRows::new(&mut seq, Charset::Utf8, true);
        rows.encode_end(FetchEnd::More, 2, &mut out).unwrap();
        rows.encode_end(FetchEnd::Absent, 0, &mut out).unwrap();
        assert_eq!(&out[5..9], &[0, 0, 0x42, 0]);
        assert_eq!(&out[9 + 5..], &[0, 0, 0xc2, 0]);
        assert_eq!(out[9 + 3], 1);
    }
}
