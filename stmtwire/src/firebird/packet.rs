//! Firebird statement packets.
//!
//! Every packet starts with its 4 byte opcode, every field is XDR encoded.
use bytes::{BufMut, Bytes, BytesMut};

use super::{
    ColumnType, blr,
    codec::{CodecContext, decode_parameters, encode_row},
    *,
};
use crate::{
    Error, Result,
    codec::{BufMutExt, FramingError, Payload},
    common::{ByteStr, verbose},
    fetch::{FetchEnd, FetchProtocol},
    statement::{Extras, StatementId},
    value::Value,
};

/// Status vector argument types.
const ISC_ARG_END: u32 = 0;
const ISC_ARG_GDS: u32 = 1;
const ISC_ARG_INTERPRETED: u32 = 5;
const ISC_ARG_SQL_STATE: u32 = 19;

/// Statement packets sent by the client.
#[derive(Debug)]
pub enum Request {
    AllocateStatement(AllocateStatement),
    Prepare(Prepare),
    Execute(Execute),
    Fetch(Fetch),
    FreeStatement(FreeStatement),
}

impl Request {
    /// Decode a packet, `version` is the negotiated protocol version.
    ///
    /// Parameter values of an execute are decoded with `cx`.
    pub fn decode(packet: Bytes, version: u32, cx: &CodecContext) -> Result<Request> {
        let mut payload = Payload::new(packet);
        let opcode = payload.get_u32()?;
        verbose!(opcode, len = payload.remaining(), "firebird request");

        let request = match opcode {
            OP_ALLOCATE_STATEMENT => Self::AllocateStatement(AllocateStatement::decode(&mut payload)?),
            OP_PREPARE_STATEMENT => Self::Prepare(Prepare::decode(&mut payload, cx)?),
            OP_EXECUTE | OP_EXECUTE2 => {
                Self::Execute(Execute::decode(&mut payload, opcode == OP_EXECUTE2, version, cx)?)
            }
            OP_FETCH => Self::Fetch(Fetch::decode(&mut payload)?),
            OP_FREE_STATEMENT => Self::FreeStatement(FreeStatement::decode(&mut payload)?),
            code => return Err(FramingError::UnknownCommand { dialect: "firebird", code }.into()),
        };
        Ok(request)
    }
}

/// `op_allocate_statement`
#[derive(Debug)]
pub struct AllocateStatement {
    pub database: u32,
}

impl AllocateStatement {
    fn decode(payload: &mut Payload) -> Result<Self> {
        Ok(Self { database: payload.get_u32()? })
    }
}

/// `op_prepare_statement`
#[derive(Debug)]
pub struct Prepare {
    pub transaction_id: u32,
    pub statement_id: StatementId,
    pub sql_dialect: u32,
    pub sql: ByteStr,
    /// Requested info items, answered by the describe layer.
    pub items: Bytes,
    pub buffer_length: u32,
}

impl Prepare {
    fn decode(payload: &mut Payload, cx: &CodecContext) -> Result<Self> {
        let transaction_id = payload.get_u32()?;
        let statement_id = StatementId(payload.get_u32()?);
        let sql_dialect = payload.get_u32()?;
        let sql = match payload.get_string(cx.charset)? {
            Value::Text(sql) => sql,
            Value::Bytes(raw) => ByteStr::from_utf8(raw)?,
            _ => ByteStr::default(),
        };
        Ok(Self {
            transaction_id,
            statement_id,
            sql_dialect,
            sql,
            items: payload.get_var_buffer()?,
            buffer_length: payload.get_u32()?,
        })
    }
}

/// `op_execute` and `op_execute2`.
#[derive(Debug)]
pub struct Execute {
    /// `op_execute2`, a stored procedure execute with an output message.
    pub procedure: bool,
    pub statement_id: StatementId,
    pub transaction_id: u32,
    pub parameter_types: Vec<ColumnType>,
    pub message_number: u32,
    pub message_count: u32,
    pub parameters: Vec<Value>,
    pub output_types: Option<Vec<ColumnType>>,
    pub output_message_number: u32,
    pub extras: Extras,
}

impl Execute {
    fn decode(payload: &mut Payload, procedure: bool, version: u32, cx: &CodecContext) -> Result<Self> {
        let statement_id = StatementId(payload.get_u32()?);
        let transaction_id = payload.get_u32()?;
        let parameter_types = blr::parse(payload.get_var_buffer()?)
            .map_err(|e| Error::from(e).context("parameter descriptor"))?;
        let message_number = payload.get_u32()?;
        let message_count = payload.get_u32()?;
        let parameters = decode_parameters(payload, &parameter_types, message_count, cx)?;

        let (output_types, output_message_number) = match procedure {
            true => {
                let types = blr::parse(payload.get_var_buffer()?)
                    .map_err(|e| Error::from(e).context("output descriptor"))?;
                (Some(types), payload.get_u32()?)
            }
            false => (None, 0),
        };

        let mut extras = Extras::default();
        if version >= PROTOCOL_VERSION16 {
            extras.timeout = Some(payload.get_u32()?);
        }
        if version >= PROTOCOL_VERSION18 {
            extras.cursor_flags = Some(payload.get_u32()?);
        }
        if version >= PROTOCOL_VERSION19 {
            extras.max_blob_size = Some(payload.get_u32()?);
        }

        Ok(Self {
            procedure,
            statement_id,
            transaction_id,
            parameter_types,
            message_number,
            message_count,
            parameters,
            output_types,
            output_message_number,
            extras,
        })
    }
}

/// `op_fetch`
#[derive(Debug)]
pub struct Fetch {
    pub statement_id: StatementId,
    pub output_types: Vec<ColumnType>,
    pub message_number: u32,
    /// Requested rows, 0 lets the server choose.
    pub count: u32,
}

impl Fetch {
    fn decode(payload: &mut Payload) -> Result<Self> {
        let statement_id = StatementId(payload.get_u32()?);
        let output_types = blr::parse(payload.get_var_buffer()?)
            .map_err(|e| Error::from(e).context("fetch descriptor"))?;
        Ok(Self {
            statement_id,
            output_types,
            message_number: payload.get_u32()?,
            count: payload.get_u32()?,
        })
    }
}

/// What `op_free_statement` releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeOption {
    /// Close the cursor.
    Close,
    /// Drop the statement.
    Drop,
    /// Forget the prepared sql.
    Unprepare,
}

/// `op_free_statement`
#[derive(Debug)]
pub struct FreeStatement {
    pub statement_id: StatementId,
    pub option: FreeOption,
}

impl FreeStatement {
    fn decode(payload: &mut Payload) -> Result<Self> {
        let statement_id = StatementId(payload.get_u32()?);
        let option = match payload.get_u32()? {
            DSQL_CLOSE => FreeOption::Close,
            DSQL_DROP => FreeOption::Drop,
            DSQL_UNPREPARE => FreeOption::Unprepare,
            other => {
                return Err(crate::codec::CodecError::invalid("free option", other.to_string()).into());
            }
        };
        Ok(Self { statement_id, option })
    }
}

/// Status vector of an [`op_response`][OP_RESPONSE].
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Success,
    Error {
        code: u32,
        message: String,
        sqlstate: String,
    },
}

impl Status {
    pub fn from_error(err: &Error) -> Status {
        Status::Error {
            code: ISC_DSQL_ERROR,
            message: err.message(),
            sqlstate: err.sqlstate().to_owned(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        if let Status::Error { code, message, sqlstate } = self {
            buf.put_u32(ISC_ARG_GDS);
            buf.put_u32(*code);
            buf.put_u32(ISC_ARG_INTERPRETED);
            buf.put_var_buffer(message.as_bytes());
            buf.put_u32(ISC_ARG_SQL_STATE);
            buf.put_var_buffer(sqlstate.as_bytes());
        }
        buf.put_u32(ISC_ARG_END);
    }
}

/// `op_response`, the generic reply.
#[derive(Debug)]
pub struct Response {
    pub handle: u32,
    pub blob_id: u64,
    pub data: Bytes,
    pub status: Status,
}

impl Response {
    pub fn ok(handle: u32) -> Response {
        Self { handle, blob_id: 0, data: Bytes::new(), status: Status::Success }
    }

    pub fn error(err: &Error) -> Response {
        Self { handle: 0, blob_id: 0, data: Bytes::new(), status: Status::from_error(err) }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(OP_RESPONSE);
        buf.put_u32(self.handle);
        buf.put_u64(self.blob_id);
        buf.put_var_buffer(&self.data);
        self.status.encode(buf);
    }
}

/// `op_sql_response`, the output message of a stored procedure.
#[derive(Debug)]
pub struct SqlResponse<'a> {
    pub output: Option<&'a [Value]>,
}

impl SqlResponse<'_> {
    pub fn encode(&self, buf: &mut BytesMut, cx: &CodecContext) -> Result<()> {
        buf.put_u32(OP_SQL_RESPONSE);
        match self.output {
            Some(row) => {
                buf.put_u32(1);
                encode_row(row, buf, cx)
            }
            None => {
                buf.put_u32(0);
                Ok(())
            }
        }
    }
}

/// `op_fetch_response` stream of one fetch batch.
///
/// Each row is its own packet with status 0 and count 1. The batch ends
/// with count 0 and status 100 when the cursor ran out, or 0 when the client
/// must fetch again.
pub struct FetchResponse<'a> {
    cx: CodecContext<'a>,
}

impl<'a> FetchResponse<'a> {
    pub fn new(cx: CodecContext<'a>) -> Self {
        Self { cx }
    }
}

impl FetchProtocol for FetchResponse<'_> {
    fn encode_row(&mut self, row: &[Value], out: &mut BytesMut) -> Result<()> {
        out.put_u32(OP_FETCH_RESPONSE);
        out.put_u32(FETCH_OK);
        out.put_u32(1);
        encode_row(row, out, &self.cx)
    }

    fn encode_end(&mut self, end: FetchEnd, _: u32, out: &mut BytesMut) -> Result<()> {
        out.put_u32(OP_FETCH_RESPONSE);
        out.put_u32(match end {
            FetchEnd::More => FETCH_OK,
            FetchEnd::Exhausted | FetchEnd::Absent => FETCH_NO_MORE_ROWS,
        });
        out.put_u32(0);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{codec::Charset, pool::BufferPool};

    fn cx(pool: &std::sync::Arc<BufferPool>) -> CodecContext<'_> {
        CodecContext { charset: Charset::Utf8, pool, blobs: None, max_blob_size: 1024 }
    }

    fn execute_packet(opcode: u32, version: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(opcode);
        buf.put_u32(5);
        buf.put_u32(9);
        buf.put_var_buffer(&blr::build(&[ColumnType::Long, ColumnType::Text]).unwrap());
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_slice(&[0, 0, 0, 0, 0, 0, 0, 42, 0, 0, 0, 3, b'a', b'b', b'c', 0]);
        if opcode == OP_EXECUTE2 {
            buf.put_var_buffer(&blr::build(&[ColumnType::Int64]).unwrap());
            buf.put_u32(1);
        }
        if version >= PROTOCOL_VERSION16 {
            buf.put_u32(3000);
        }
        if version >= PROTOCOL_VERSION18 {
            buf.put_u32(1);
        }
        if version >= PROTOCOL_VERSION19 {
            buf.put_u32(512);
        }
        buf.freeze()
    }

    #[test]
    fn decode_execute() {
        let pool = BufferPool::new(1, 64);
        let packet = execute_packet(OP_EXECUTE, PROTOCOL_VERSION19);
        let Request::Execute(execute) = Request::decode(packet, PROTOCOL_VERSION19, &cx(&pool)).unwrap() else {
            panic!("expected execute");
        };
        assert!(!execute.procedure);
        assert_eq!(execute.statement_id, StatementId(5));
        assert_eq!(execute.transaction_id, 9);
        assert_eq!(execute.parameter_types, [ColumnType::Long, ColumnType::Text]);
        assert_eq!(execute.parameters, [Value::Int(42), Value::from("abc")]);
        assert_eq!(
            execute.extras,
            Extras { timeout: Some(3000), cursor_flags: Some(1), max_blob_size: Some(512) }
        );
    }

    #[test]
    fn extras_follow_protocol_version() {
        let pool = BufferPool::new(1, 64);
        for version in [PROTOCOL_VERSION13, PROTOCOL_VERSION16, PROTOCOL_VERSION18] {
            let packet = execute_packet(OP_EXECUTE2, version);
            let Request::Execute(execute) = Request::decode(packet, version, &cx(&pool)).unwrap() else {
                panic!("expected execute");
            };
            assert!(execute.procedure);
            assert_eq!(execute.output_types.as_deref(), Some(&[ColumnType::Int64][..]));
            assert_eq!(execute.output_message_number, 1);
            assert_eq!(execute.extras.timeout.is_some(), version >= PROTOCOL_VERSION16);
            assert_eq!(execute.extras.cursor_flags.is_some(), version >= PROTOCOL_VERSION18);
            assert_eq!(execute.extras.max_blob_size, None);
        }
    }

    #[test]
    fn unknown_tag_is_statement_scoped() {
        let pool = BufferPool::new(1, 64);
        let mut buf = BytesMut::new();
        buf.put_u32(OP_EXECUTE);
        buf.put_u32(5);
        buf.put_u32(0);
        buf.put_var_buffer(&[5, 2, 4, 0, 1, 0, 99, 0, 0, 255, 76]);
        buf.put_u32(0);
        buf.put_u32(0);
        let err = Request::decode(buf.freeze(), PROTOCOL_VERSION13, &cx(&pool)).unwrap_err();
        assert!(!err.is_connection_fatal());
        assert_eq!(err.sqlstate(), "HY004");
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let pool = BufferPool::new(1, 64);
        let err = Request::decode(Bytes::from_static(&[0, 0, 0, 1]), PROTOCOL_VERSION13, &cx(&pool)).unwrap_err();
        assert!(err.is_connection_fatal());
        let err = Request::decode(Bytes::from_static(&[0, 0, 0, 65, 0]), PROTOCOL_VERSION13, &cx(&pool)).unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn decode_fetch_and_free() {
        let pool = BufferPool::new(1, 64);
        let mut buf = BytesMut::new();
        buf.put_u32(OP_FETCH);
        buf.put_u32(5);
        buf.put_var_buffer(&blr::build(&[ColumnType::Long]).unwrap());
        buf.put_u32(0);
        buf.put_u32(3);
        let Request::Fetch(fetch) = Request::decode(buf.freeze(), PROTOCOL_VERSION13, &cx(&pool)).unwrap() else {
            panic!("expected fetch");
        };
        assert_eq!((fetch.statement_id, fetch.count), (StatementId(5), 3));
        assert_eq!(fetch.output_types, [ColumnType::Long]);

        let packet = Bytes::from_static(&[0, 0, 0, 67, 0, 0, 0, 5, 0, 0, 0, 2]);
        let Request::FreeStatement(free) = Request::decode(packet, PROTOCOL_VERSION13, &cx(&pool)).unwrap() else {
            panic!("expected free");
        };
        assert_eq!(free.option, FreeOption::Drop);
    }

    #[test]
    fn encode_responses() {
        let mut buf = BytesMut::new();
        Response::ok(5).encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 9, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let err = Error::from(crate::statement::StateError::CursorOpen(StatementId(5)));
        let mut buf = BytesMut::new();
        Response::error(&err).encode(&mut buf);
        let mut payload = Payload::new(buf.freeze());
        payload.skip_reserved(4 + 4 + 8).unwrap();
        payload.get_var_buffer().unwrap();
        assert_eq!(payload.get_u32().unwrap(), ISC_ARG_GDS);
        assert_eq!(payload.get_u32().unwrap(), ISC_DSQL_ERROR);
        assert_eq!(payload.get_u32().unwrap(), ISC_ARG_INTERPRETED);
        payload.get_var_buffer().unwrap();
        assert_eq!(payload.get_u32().unwrap(), ISC_ARG_SQL_STATE);
        assert_eq!(&payload.get_var_buffer().unwrap()[..], b"24000");
        assert_eq!(payload.get_u32().unwrap(), ISC_ARG_END);
        assert!(payload.is_empty());
    }

    #[test]
    fn fetch_terminators() {
        let pool = BufferPool::new(1, 64);
        let mut response = FetchResponse::new(cx(&pool));
        let mut out = BytesMut::new();
        response.encode_end(FetchEnd::More, 3, &mut out).unwrap();
        response.encode_end(FetchEnd::Exhausted, 1, &mut out).unwrap();
        response.encode_end(FetchEnd::Absent, 0, &mut out).unwrap();
        assert_eq!(&out[..12], &[0, 0, 0, 66, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&out[12..24], &[0, 0, 0, 66, 0, 0, 0, 100, 0, 0, 0, 0]);
        assert_eq!(out[12..24], out[24..]);
    }
}
