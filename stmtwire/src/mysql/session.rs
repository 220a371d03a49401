use bytes::{Bytes, BytesMut};

use super::{
    ParameterType, SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_CURSOR_EXISTS, codec,
    packet::{BinaryRows, ErrPacket, Execute, OkPacket, PrepareOk, Request, write_definitions, write_packet},
};
use crate::{
    Result,
    codec::{BufMutExt, Charset, CodecError},
    common::ByteStr,
    engine::Connection,
    fetch::{self, Batch},
    registry::Cursor,
    source::{Backend, ExecuteRequest, Execution, ResultSource, VecSource},
    statement::{Extras, LookupError, Statement, StatementId, StatementTable},
};

/// MySQL prepared statement command loop of one connection.
///
/// Feed the payload of each statement command to
/// [`handle`][MySqlSession::handle] and send back the returned packets.
/// Statement scoped errors are answered with an `ERR_Packet`, an `Err`
/// means the connection must be closed.
pub struct MySqlSession<B> {
    conn: Connection,
    statements: StatementTable<ParameterType>,
    backend: B,
    charset: Charset,
}

fn count(len: usize, what: &'static str) -> Result<u16> {
    Ok(u16::try_from(len).map_err(|_| CodecError::invalid(what, format!("{len} exceeds u16")))?)
}

impl<B: Backend> MySqlSession<B> {
    pub fn new(conn: Connection, backend: B) -> Self {
        let charset = conn.config().charset;
        Self { conn, statements: StatementTable::new(), backend, charset }
    }

    /// Text charset negotiated by the handshake collation id.
    ///
    /// Unknown collations keep the configured charset.
    pub fn set_collation(&mut self, collation: u16) {
        match Charset::from_mysql_collation(collation) {
            Some(charset) => self.charset = charset,
            None => tracing::debug!(conn = %self.conn.id(), collation, "unknown collation"),
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn statement(&self, id: StatementId) -> Option<&Statement<ParameterType>> {
        self.statements.get(id)
    }

    /// Handle one command payload, returns the response packets.
    pub async fn handle(&mut self, payload: Bytes) -> Result<BytesMut> {
        let mut out = BytesMut::new();
        // the command is packet 0
        let mut seq = 1;
        let result = match Request::decode(payload, self.charset) {
            Ok(request) => self.dispatch(request, &mut seq, &mut out).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(out),
            Err(err) if err.is_connection_fatal() => {
                tracing::warn!(conn = %self.conn.id(), %err, "mysql protocol error");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(conn = %self.conn.id(), %err, "statement error");
                out.clear();
                let mut seq = 1;
                write_packet(&mut out, &mut seq, |buf| {
                    ErrPacket::from_error(&err).encode(buf);
                    Ok(())
                })?;
                Ok(out)
            }
        }
    }

    /// Run a decoded command, writing its packets to `out`.
    pub async fn dispatch(&mut self, request: Request, seq: &mut u8, out: &mut BytesMut) -> Result<()> {
        match request {
            Request::Prepare { sql } => self.prepare(sql, seq, out).await,
            Request::Execute(execute) => self.execute(execute, seq, out).await,
            Request::Fetch { statement_id, rows } => self.fetch(statement_id, rows, seq, out).await,
            Request::Close { statement_id } => {
                self.close(statement_id);
                Ok(())
            }
            Request::Reset { statement_id } => self.reset(statement_id, seq, out),
        }
    }

    async fn prepare(&mut self, sql: ByteStr, seq: &mut u8, out: &mut BytesMut) -> Result<()> {
        let statement = self.statements.allocate();
        let id = statement.id();

        match self.backend.prepare(id, &sql).await {
            Ok(prepared) => statement.set_prepared(prepared),
            Err(err) => {
                self.statements.remove(id);
                return Err(err.into());
            }
        }
        tracing::debug!(conn = %self.conn.id(), stmt = %id, "statement prepared");

        let Some(statement) = self.statements.get(id) else {
            return Err(LookupError::UnknownStatement(id).into());
        };
        let ok = PrepareOk {
            statement_id: id,
            columns: count(statement.columns().len(), "column count")?,
            params: count(statement.params().len(), "parameter count")?,
            warnings: 0,
        };
        write_packet(out, seq, |buf| {
            ok.encode(buf);
            Ok(())
        })?;
        write_definitions(out, seq, statement.params(), self.charset, SERVER_STATUS_AUTOCOMMIT)?;
        write_definitions(out, seq, statement.columns(), self.charset, SERVER_STATUS_AUTOCOMMIT)
    }

    async fn execute(&mut self, execute: Execute, seq: &mut u8, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        let cursor = execute.cursor();
        let Execute { statement_id: id, flags, mut parameters, .. } = execute;

        let statement = self.statements.get_mut(id).ok_or(LookupError::UnknownStatement(id))?;
        let (types, params) = codec::decode_parameters(
            &mut parameters,
            statement.params().len(),
            statement.parameter_types(),
            self.charset,
        )?;
        let extras = Extras { cursor_flags: Some(flags.into()), ..Extras::default() };
        statement.bind(0, types, None, extras)?;

        let request = ExecuteRequest { statement: id, transaction_id: 0, params, extras, cursor };
        let source: Box<dyn ResultSource> = match self.backend.execute(request).await? {
            Execution::Rows(source) => source,
            Execution::Output(row) => Box::new(VecSource::new([row])),
            Execution::Affected(affected_rows) => {
                statement.executed(false)?;
                return write_packet(out, seq, |buf| {
                    OkPacket { affected_rows, status: SERVER_STATUS_AUTOCOMMIT, ..OkPacket::default() }.encode(buf);
                    Ok(())
                });
            }
        };

        let status = match cursor {
            true => SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS,
            false => SERVER_STATUS_AUTOCOMMIT,
        };
        let columns = statement.columns();
        write_packet(out, seq, |buf| {
            buf.put_lenenc_int(columns.len() as u64);
            Ok(())
        })?;
        write_definitions(out, seq, columns, self.charset, status)?;

        let registry = self.conn.registry();
        registry.register_statement(conn, id, Cursor::new(source).into_handle())?;
        statement.executed(true)?;

        if cursor {
            tracing::debug!(%conn, stmt = %id, "cursor opened");
            return Ok(());
        }

        // no cursor, stream every row now
        statement.begin_fetch();
        let mut protocol = BinaryRows::new(seq, self.charset, false);
        let result = fetch::fetch(registry, conn, id, Batch::All, &mut protocol, out).await;
        if result.is_err() {
            registry.unregister_statement(conn, id);
        }
        statement.end_fetch(true);
        result.map(drop)
    }

    async fn fetch(&mut self, id: StatementId, rows: u32, seq: &mut u8, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        if let Some(statement) = self.statements.get_mut(id) {
            statement.begin_fetch();
        }

        let batch = Batch::rows_or(rows, self.conn.config().fetch_size);
        let mut protocol = BinaryRows::new(seq, self.charset, true);
        let result = fetch::fetch(self.conn.registry(), conn, id, batch, &mut protocol, out).await;

        let exhausted = matches!(&result, Ok(fetched) if fetched.end.is_terminal());
        if let Some(statement) = self.statements.get_mut(id) {
            statement.end_fetch(exhausted);
        }
        result.map(drop)
    }

    fn close(&mut self, id: StatementId) {
        let conn = self.conn.id();
        self.conn.registry().unregister_statement(conn, id);
        match self.statements.remove(id) {
            Some(_) => {
                self.backend.free(id);
                tracing::debug!(%conn, stmt = %id, "statement closed");
            }
            None => tracing::debug!(%conn, stmt = %id, "close of unknown statement"),
        }
    }

    fn reset(&mut self, id: StatementId, seq: &mut u8, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        self.conn.registry().unregister_statement(conn, id);
        match self.statements.get_mut(id) {
            Some(statement) => statement.close_cursor(),
            None => tracing::debug!(%conn, stmt = %id, "reset of unknown statement"),
        }
        write_packet(out, seq, |buf| {
            OkPacket { status: SERVER_STATUS_AUTOCOMMIT, ..OkPacket::default() }.encode(buf);
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::{
        Config, Engine,
        codec::Payload,
        mysql::{ColumnType, SERVER_STATUS_LAST_ROW_SENT},
        source::{ColumnDef, Prepared, test::MockBackend},
        statement::StatementState,
        value::{Value, ValueKind},
    };

    /// Split response packets into sequence ids and payloads.
    fn packets(out: BytesMut) -> Vec<(u8, Payload)> {
        let mut payload = Payload::new(out.freeze());
        let mut frames = vec![];
        while !payload.is_empty() {
            let len = payload.get_u16_le().unwrap() as usize + ((payload.get_u8().unwrap() as usize) << 16);
            let seq = payload.get_u8().unwrap();
            frames.push((seq, payload.split_payload(len).unwrap()));
        }
        frames
    }

    fn eof_status(mut payload: Payload) -> u16 {
        assert_eq!(payload.get_u8().unwrap(), 0xfe);
        payload.get_u16_le().unwrap();
        payload.get_u16_le().unwrap()
    }

    fn rows(n: i32) -> Vec<Vec<Value>> {
        (1..=n).map(|i| vec![Value::Int(i), Value::from("row")]).collect()
    }

    fn session(rows: Vec<Vec<Value>>) -> (Engine, MySqlSession<MockBackend>) {
        let engine = Engine::new(Config::default());
        let prepared = Prepared {
            params: vec![ColumnDef::new("?", ValueKind::Int)],
            columns: vec![ColumnDef::new("id", ValueKind::Int), ColumnDef::new("name", ValueKind::Text)],
        };
        let backend = MockBackend { prepared, rows, ..Default::default() };
        let session = MySqlSession::new(engine.accept(), backend);
        (engine, session)
    }

    async fn prepare(session: &mut MySqlSession<MockBackend>) -> u32 {
        let out = session.handle(Bytes::from_static(b"\x16select id, name from t where id > ?")).await.unwrap();
        let frames = packets(out);
        // ok, 1 param + eof, 2 columns + eof
        assert_eq!(frames.len(), 6);
        assert_eq!(frames.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(), [1, 2, 3, 4, 5, 6]);
        let mut ok = frames[0].1.clone();
        assert_eq!(ok.get_u8().unwrap(), 0);
        let id = ok.get_u32_le().unwrap();
        assert_eq!((ok.get_u16_le().unwrap(), ok.get_u16_le().unwrap()), (2, 1));
        id
    }

    fn execute(id: u32, flags: u8, param: i32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(crate::mysql::COM_STMT_EXECUTE);
        buf.put_u32_le(id);
        buf.put_u8(flags);
        buf.put_u32_le(1);
        codec::encode_parameters(&[Value::Int(param)], &mut buf, Charset::Utf8).unwrap();
        buf.freeze()
    }

    fn fetch(id: u32, rows: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(crate::mysql::COM_STMT_FETCH);
        buf.put_u32_le(id);
        buf.put_u32_le(rows);
        buf.freeze()
    }

    fn decode_rows(frames: &[(u8, Payload)]) -> Vec<Vec<Value>> {
        let types = [ColumnType::Long, ColumnType::VarString];
        frames
            .iter()
            .map(|(_, payload)| codec::decode_row(&mut payload.clone(), &types, Charset::Utf8).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn cursor_fetch() {
        let (engine, mut session) = session(rows(3));
        let conn = session.connection().id();
        let id = prepare(&mut session).await;

        let frames = packets(session.handle(execute(id, 1, 0)).await.unwrap());
        // column count, 2 definitions, eof
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].1.chunk(), &[2]);
        assert_eq!(eof_status(frames[3].1.clone()), SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS);
        assert_eq!(session.backend().requests[0].params, [Value::Int(0)]);
        assert!(session.backend().requests[0].cursor);
        assert_eq!(engine.registry().cursor_count(conn), 1);

        let frames = packets(session.handle(fetch(id, 2)).await.unwrap());
        assert_eq!(frames.len(), 3);
        assert_eq!(decode_rows(&frames[..2]), rows(2));
        assert_eq!(eof_status(frames[2].1.clone()), SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS);

        let frames = packets(session.handle(fetch(id, 2)).await.unwrap());
        assert_eq!(frames.len(), 2);
        assert_eq!(decode_rows(&frames[..1]), [vec![Value::Int(3), Value::from("row")]]);
        assert_ne!(eof_status(frames[1].1.clone()) & SERVER_STATUS_LAST_ROW_SENT, 0);
        assert!(session.backend().flags[0].is_released());
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert_eq!(
            session.statement(StatementId(id)).unwrap().state(),
            StatementState::Executed { cursor: false }
        );
    }

    #[tokio::test]
    async fn streamed_result() {
        let (engine, mut session) = session(rows(3));
        let id = prepare(&mut session).await;

        let frames = packets(session.handle(execute(id, 0, 7)).await.unwrap());
        // column count, 2 definitions, eof, 3 rows, eof
        assert_eq!(frames.len(), 8);
        assert_eq!(eof_status(frames[3].1.clone()), SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(decode_rows(&frames[4..7]), rows(3));
        assert_eq!(eof_status(frames[7].1.clone()), SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(frames[7].0, 8);
        assert!(session.backend().flags[0].is_released());
        assert_eq!(engine.registry().cursor_count(session.connection().id()), 0);

        // executing again reuses the bound types
        let mut buf = BytesMut::new();
        buf.put_u8(crate::mysql::COM_STMT_EXECUTE);
        buf.put_u32_le(id);
        buf.put_u8(0);
        buf.put_u32_le(1);
        buf.put_slice(&[0, 0, 9, 0, 0, 0]);
        session.handle(buf.freeze()).await.unwrap();
        assert_eq!(session.backend().requests[1].params, [Value::Int(9)]);
    }

    #[tokio::test]
    async fn affected_rows() {
        let (_engine, mut session) = session(vec![]);
        let id = prepare(&mut session).await;
        session.backend.affected = Some(3);

        let frames = packets(session.handle(execute(id, 0, 1)).await.unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1.chunk(), &[0, 3, 0, 2, 0, 0, 0]);
    }

    #[tokio::test]
    async fn errors() {
        let (_engine, mut session) = session(vec![]);

        let frames = packets(session.handle(Bytes::from_static(b"\x16bogus")).await.unwrap());
        let mut err = frames[0].1.clone();
        assert_eq!(err.get_u8().unwrap(), 0xff);
        err.skip_reserved(3).unwrap();
        assert_eq!(&err.get_bytes(5).unwrap()[..], b"42601");
        assert!(session.statement(StatementId(1)).is_none());

        let err = session.handle(execute(42, 0, 1)).await.unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[tokio::test]
    async fn close_and_reset() {
        let (engine, mut session) = session(rows(5));
        let conn = session.connection().id();
        let id = prepare(&mut session).await;
        session.handle(execute(id, 1, 0)).await.unwrap();

        let mut reset = BytesMut::new();
        reset.put_u8(crate::mysql::COM_STMT_RESET);
        reset.put_u32_le(id);
        let frames = packets(session.handle(reset.freeze()).await.unwrap());
        assert_eq!(frames[0].1.chunk()[0], 0x00);
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert!(session.backend().flags[0].is_released());

        let mut close = BytesMut::new();
        close.put_u8(crate::mysql::COM_STMT_CLOSE);
        close.put_u32_le(id);
        assert!(session.handle(close.freeze()).await.unwrap().is_empty());
        assert!(session.statement(StatementId(id)).is_none());
        assert_eq!(session.backend().freed, [StatementId(id)]);

        // fetch on a closed statement only ends the stream
        let frames = packets(session.handle(fetch(id, 2)).await.unwrap());
        assert_eq!(frames.len(), 1);
        assert_ne!(eof_status(frames[0].1.clone()) & SERVER_STATUS_LAST_ROW_SENT, 0);
    }
}
