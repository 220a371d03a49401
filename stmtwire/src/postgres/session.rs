use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

use super::{
    Oid, PgFormat, PgType, codec,
    backend::{
        BindComplete, CloseComplete, CommandComplete, ErrorResponse, NoData, ParameterDescription,
        ParseComplete, PortalRows, ReadyForQuery, RowDescription, write,
    },
    frontend::{Bind, Close, Describe, Execute, FrontendMessage, FrontendProtocol, Parse, Target},
};
use crate::{
    Result,
    codec::{Charset, DescriptorError},
    common::{ByteStr, verbose},
    engine::Connection,
    fetch::{self, Batch},
    registry::Cursor,
    source::{Backend, ExecuteRequest, Execution, ResultSource, VecSource},
    statement::{Extras, LookupError, Statement, StatementId, StatementTable},
    value::Value,
};

/// A named prepared statement.
#[derive(Debug)]
struct Prepared {
    id: StatementId,
    oids: Vec<Oid>,
    tag: String,
    /// The tag reports a row count.
    counted: bool,
}

#[derive(Debug)]
struct Portal {
    statement: StatementId,
    /// Registry key of the cursor.
    cursor: StatementId,
    types: Vec<PgType>,
    params: Vec<Value>,
    formats: Vec<PgFormat>,
    tag: String,
    counted: bool,
    executed: bool,
}

/// Command keyword of the CommandComplete tag.
fn command_tag(sql: &str) -> (String, bool) {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let keyword = match keyword.as_str() {
        "WITH" | "VALUES" | "TABLE" => String::from("SELECT"),
        _ => keyword,
    };
    let counted = matches!(
        keyword.as_str(),
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "MOVE" | "FETCH" | "COPY"
    );
    (keyword, counted)
}

/// Parameter types of a statement, declared oids first, then the types
/// reported by the backend.
fn parameter_types(prepared: &Prepared, statement: &Statement<PgType>) -> Vec<PgType> {
    let len = prepared.oids.len().max(statement.params().len());
    (0..len)
        .map(|i| {
            let oid = prepared.oids.get(i).copied().unwrap_or(0);
            PgType::resolve(oid, statement.params().get(i).map(|param| param.kind))
        })
        .collect()
}

/// Postgres extended query protocol of one connection.
///
/// Prepared statements are [`Statement`]s looked up by name, portals are
/// registry cursors. `Execute` with a row limit is a bounded fetch. After
/// an error, messages are discarded until `Sync`.
pub struct PgSession<B> {
    conn: Connection,
    statements: StatementTable<PgType>,
    prepared: HashMap<ByteStr, Prepared>,
    portals: HashMap<ByteStr, Portal>,
    next_portal: u32,
    backend: B,
    charset: Charset,
    failed: bool,
}

impl<B: Backend> PgSession<B> {
    pub fn new(conn: Connection, backend: B) -> Self {
        let charset = conn.config().charset;
        Self {
            conn,
            statements: StatementTable::new(),
            prepared: HashMap::new(),
            portals: HashMap::new(),
            next_portal: 1,
            backend,
            charset,
            failed: false,
        }
    }

    /// Text charset from the `client_encoding` parameter.
    pub fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        let charset = match encoding.to_ascii_uppercase().as_str() {
            "UTF8" | "UNICODE" => Charset::Utf8,
            "LATIN1" => Charset::Latin1,
            "SQL_ASCII" => Charset::Ascii,
            other => Charset::from_name(other).ok_or(DescriptorError::Malformed("unsupported client_encoding"))?,
        };
        self.charset = charset;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Statement prepared as `name`.
    pub fn statement(&self, name: &str) -> Option<&Statement<PgType>> {
        self.statements.get(self.prepared.get(name)?.id)
    }

    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    /// Handle one frontend message, returns the response messages.
    pub async fn handle(&mut self, msgtype: u8, body: Bytes) -> Result<BytesMut> {
        let mut out = BytesMut::new();
        let result = match FrontendMessage::decode(msgtype, body) {
            Ok(FrontendMessage::Sync(_)) => self.sync(&mut out),
            Err(err) if err.is_connection_fatal() => Err(err),
            _ if self.failed => {
                verbose!(msgtype, "discarded until sync");
                return Ok(out);
            }
            Ok(message) => self.dispatch(message, &mut out).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(out),
            Err(err) if err.is_connection_fatal() => {
                tracing::warn!(conn = %self.conn.id(), %err, "postgres protocol error");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(conn = %self.conn.id(), %err, "statement error");
                self.failed = true;
                out.clear();
                write(&ErrorResponse::from_error(&err), &mut out)?;
                Ok(out)
            }
        }
    }

    /// Run a decoded message other than `Sync`, writing its responses to `out`.
    pub async fn dispatch(&mut self, message: FrontendMessage, out: &mut BytesMut) -> Result<()> {
        match message {
            FrontendMessage::Parse(parse) => self.parse(parse, out).await,
            FrontendMessage::Bind(bind) => self.bind(bind, out),
            FrontendMessage::Describe(describe) => self.describe(describe, out),
            FrontendMessage::Execute(execute) => self.execute(execute, out).await,
            FrontendMessage::Close(close) => self.close(close, out),
            FrontendMessage::Sync(_) => self.sync(out),
            // responses are flushed by the caller
            FrontendMessage::Flush(_) => Ok(()),
        }
    }

    async fn parse(&mut self, parse: Parse, out: &mut BytesMut) -> Result<()> {
        let Parse { name, sql, oids } = parse;
        if name.is_empty() {
            self.close_statement("");
        } else if self.prepared.contains_key(&name) {
            return Err(LookupError::DuplicatePreparedStatement(name).into());
        }

        let statement = self.statements.allocate();
        let id = statement.id();
        match self.backend.prepare(id, &sql).await {
            Ok(prepared) => statement.set_prepared(prepared),
            Err(err) => {
                self.statements.remove(id);
                return Err(err.into());
            }
        }

        tracing::debug!(conn = %self.conn.id(), stmt = %id, %name, "statement prepared");
        let (tag, counted) = command_tag(&sql);
        self.prepared.insert(name, Prepared { id, oids, tag, counted });
        write(&ParseComplete, out)
    }

    fn bind(&mut self, bind: Bind, out: &mut BytesMut) -> Result<()> {
        let Some(prepared) = self.prepared.get(&bind.statement) else {
            return Err(LookupError::UnknownPreparedStatement(bind.statement).into());
        };
        let id = prepared.id;
        let statement = self.statements.get(id).ok_or(LookupError::UnknownStatement(id))?;

        let types = parameter_types(prepared, statement);
        if !types.is_empty() && types.len() != bind.params.len() {
            return Err(DescriptorError::CountMismatch { expected: types.len(), found: bind.params.len() }.into());
        }

        let formats = PgFormat::expand(&bind.param_formats, bind.params.len())?;
        let mut types = types;
        types.resize(bind.params.len(), PgType::Unknown);

        let mut params = Vec::with_capacity(bind.params.len());
        for (i, raw) in bind.params.into_iter().enumerate() {
            let value = match raw {
                Some(raw) => codec::decode(raw, types[i], formats[i], self.charset)
                    .map_err(|e| e.context(format!("parameter ${} {}", i + 1, types[i])))?,
                None => Value::Null,
            };
            params.push(value);
        }
        let result_formats = PgFormat::expand(&bind.result_formats, statement.columns().len())?;
        let (tag, counted) = (prepared.tag.clone(), prepared.counted);

        if bind.portal.is_empty() {
            self.close_portal("");
        } else if self.portals.contains_key(&bind.portal) {
            return Err(LookupError::DuplicatePortal(bind.portal).into());
        }

        // portals of one statement may be open side by side, the statement
        // stays in its cursor state until the last one is closed
        if !self.cursor_elsewhere(id, &bind.portal) {
            let statement = self.statements.get_mut(id).ok_or(LookupError::UnknownStatement(id))?;
            statement.bind(0, types.clone(), None, Extras::default())?;
        }

        let cursor = StatementId(self.next_portal);
        self.next_portal = self.next_portal.wrapping_add(1).max(1);
        let portal = Portal {
            statement: id,
            cursor,
            types,
            params,
            formats: result_formats,
            tag,
            counted,
            executed: false,
        };
        self.portals.insert(bind.portal, portal);
        write(&BindComplete, out)
    }

    fn describe(&mut self, describe: Describe, out: &mut BytesMut) -> Result<()> {
        let (statement, formats) = match describe.target {
            Target::Statement => {
                let Some(prepared) = self.prepared.get(&describe.name) else {
                    return Err(LookupError::UnknownPreparedStatement(describe.name).into());
                };
                let statement = self.statements.get(prepared.id).ok_or(LookupError::UnknownStatement(prepared.id))?;
                let types = parameter_types(prepared, statement);
                write(&ParameterDescription { types: &types }, out)?;
                // result formats are not known before Bind
                (statement, &[][..])
            }
            Target::Portal => {
                let Some(portal) = self.portals.get(&describe.name) else {
                    return Err(LookupError::UnknownPortal(describe.name).into());
                };
                let statement = self
                    .statements
                    .get(portal.statement)
                    .ok_or(LookupError::UnknownStatement(portal.statement))?;
                (statement, &portal.formats[..])
            }
        };

        match statement.columns() {
            [] => write(&NoData, out),
            columns => write(&RowDescription { columns, formats }, out),
        }
    }

    /// Whether a portal of `statement` other than `portal` has an open cursor.
    fn cursor_elsewhere(&self, statement: StatementId, portal: &str) -> bool {
        let conn = self.conn.id();
        self.portals.iter().any(|(name, other)| {
            other.statement == statement
                && name != portal
                && self.conn.registry().lookup(conn, other.cursor).is_some()
        })
    }

    async fn execute(&mut self, execute: Execute, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        let charset = self.charset;
        let Some(id) = self.portals.get(&execute.portal).map(|portal| portal.statement) else {
            return Err(LookupError::UnknownPortal(execute.portal).into());
        };
        // the statement keeps its cursor state while any portal is open
        let shared = self.cursor_elsewhere(id, &execute.portal);
        let Some(portal) = self.portals.get_mut(&execute.portal) else {
            return Err(LookupError::UnknownPortal(execute.portal).into());
        };
        let statement = self
            .statements
            .get_mut(portal.statement)
            .ok_or(LookupError::UnknownStatement(portal.statement))?;
        let registry = self.conn.registry();

        if !portal.executed {
            if !shared {
                statement.bind(0, portal.types.clone(), None, Extras::default())?;
            }
            let request = ExecuteRequest {
                statement: portal.statement,
                transaction_id: 0,
                params: portal.params.clone(),
                extras: statement.extras(),
                cursor: execute.max_rows != 0,
            };
            let source: Box<dyn ResultSource> = match self.backend.execute(request).await? {
                Execution::Rows(source) => source,
                Execution::Output(row) => Box::new(VecSource::new([row])),
                Execution::Affected(rows) => {
                    if !shared {
                        statement.executed(false)?;
                    }
                    portal.executed = true;
                    let rows = portal.counted.then_some(rows);
                    return write(&CommandComplete { tag: &portal.tag, rows }, out);
                }
            };
            registry.register_statement(conn, portal.cursor, Cursor::new(source).into_handle())?;
            if !shared {
                statement.executed(true)?;
            }
            portal.executed = true;
            tracing::debug!(%conn, stmt = %portal.statement, portal = %execute.portal, "portal opened");
        }

        let open = registry.lookup(conn, portal.cursor).is_some();
        if open {
            statement.begin_fetch();
        }

        // a limit of 0 means all rows
        let batch = Batch::rows_or(execute.max_rows, 0);
        let mut protocol = PortalRows::new(&portal.formats, charset, &portal.tag);
        let result = fetch::fetch(registry, conn, portal.cursor, batch, &mut protocol, out).await;

        if open {
            let exhausted = matches!(&result, Ok(fetched) if fetched.end.is_terminal());
            statement.end_fetch(exhausted && !shared);
        }
        result.map(drop)
    }

    fn close(&mut self, close: Close, out: &mut BytesMut) -> Result<()> {
        // closing a missing name is not an error
        match close.target {
            Target::Statement => self.close_statement(&close.name),
            Target::Portal => self.close_portal(&close.name),
        }
        write(&CloseComplete, out)
    }

    fn sync(&mut self, out: &mut BytesMut) -> Result<()> {
        // end of the implicit transaction
        let names = self.portals.keys().cloned().collect::<Vec<_>>();
        for name in names {
            self.close_portal(&name);
        }
        self.failed = false;
        write(&ReadyForQuery::IDLE, out)
    }

    fn close_portal(&mut self, name: &str) {
        let Some(portal) = self.portals.remove(name) else {
            return;
        };
        let conn = self.conn.id();
        if self.conn.registry().unregister_statement(conn, portal.cursor).is_some() {
            if !self.cursor_elsewhere(portal.statement, name) {
                if let Some(statement) = self.statements.get_mut(portal.statement) {
                    statement.close_cursor();
                }
            }
            tracing::debug!(%conn, stmt = %portal.statement, portal = name, "portal closed");
        }
    }

    fn close_statement(&mut self, name: &str) {
        let Some(prepared) = self.prepared.remove(name) else {
            return;
        };
        let portals = self
            .portals
            .iter()
            .filter(|(_, portal)| portal.statement == prepared.id)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for portal in portals {
            self.close_portal(&portal);
        }
        self.statements.remove(prepared.id);
        self.backend.free(prepared.id);
        tracing::debug!(conn = %self.conn.id(), stmt = %prepared.id, statement = name, "statement closed");
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::{
        Config, Engine,
        codec::{BufMutExt, Payload},
        source::{ColumnDef, Prepared as Described, test::MockBackend},
        statement::StatementState,
        value::ValueKind,
    };

    fn messages(out: BytesMut) -> Vec<(u8, Payload)> {
        let mut payload = Payload::new(out.freeze());
        let mut messages = vec![];
        while !payload.is_empty() {
            let msgtype = payload.get_u8().unwrap();
            let len = payload.get_u32().unwrap() as usize;
            messages.push((msgtype, payload.split_payload(len - 4).unwrap()));
        }
        messages
    }

    fn types(out: BytesMut) -> Vec<u8> {
        messages(out).into_iter().map(|(msgtype, _)| msgtype).collect()
    }

    fn rows(n: i32) -> Vec<Vec<Value>> {
        (1..=n).map(|i| vec![Value::Int(i), Value::from("row")]).collect()
    }

    fn session(rows: Vec<Vec<Value>>) -> (Engine, PgSession<MockBackend>) {
        let engine = Engine::new(Config::default());
        let prepared = Described {
            params: vec![ColumnDef::new("$1", ValueKind::Int)],
            columns: vec![ColumnDef::new("id", ValueKind::Int), ColumnDef::new("name", ValueKind::Text)],
        };
        let backend = MockBackend { prepared, rows, ..Default::default() };
        let session = PgSession::new(engine.accept(), backend);
        (engine, session)
    }

    fn parse(name: &str, sql: &str, oids: &[Oid]) -> Bytes {
        let mut body = BytesMut::new();
        body.put_nul_string(name);
        body.put_nul_string(sql);
        body.put_u16(oids.len() as u16);
        for oid in oids {
            body.put_u32(*oid);
        }
        body.freeze()
    }

    fn bind(portal: &str, statement: &str, param: i32, result_format: u16) -> Bytes {
        let mut body = BytesMut::new();
        body.put_nul_string(portal);
        body.put_nul_string(statement);
        body.put_u16(1);
        body.put_u16(1);
        body.put_u16(1);
        body.put_i32(4);
        body.put_i32(param);
        body.put_u16(1);
        body.put_u16(result_format);
        body.freeze()
    }

    fn execute(portal: &str, max_rows: u32) -> Bytes {
        let mut body = BytesMut::new();
        body.put_nul_string(portal);
        body.put_u32(max_rows);
        body.freeze()
    }

    fn named(target: u8, name: &str) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u8(target);
        body.put_nul_string(name);
        body.freeze()
    }

    const SQL: &str = "select id, name from t where id > $1";

    #[tokio::test]
    async fn portal_fetch() {
        let (engine, mut session) = session(rows(3));
        let conn = session.connection().id();

        assert_eq!(types(session.handle(b'P', parse("s1", SQL, &[23])).await.unwrap()), b"1");
        assert_eq!(types(session.handle(b'B', bind("p1", "s1", 0, 1)).await.unwrap()), b"2");
        assert_eq!(session.backend().requests.len(), 0);
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Bound);
        assert_eq!(types(session.handle(b'D', named(b'P', "p1")).await.unwrap()), b"T");

        let out = messages(session.handle(b'E', execute("p1", 2)).await.unwrap());
        assert_eq!(out.iter().map(|(t, _)| *t).collect::<Vec<_>>(), b"DDs");
        // binary result format
        assert_eq!(out[0].1.chunk(), b"\0\x02\0\0\0\x04\0\0\0\x01\0\0\0\x03row");
        assert_eq!(session.backend().requests[0].params, [Value::Int(0)]);
        assert!(session.backend().requests[0].cursor);
        assert_eq!(engine.registry().cursor_count(conn), 1);
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Executed { cursor: true });

        let out = messages(session.handle(b'E', execute("p1", 2)).await.unwrap());
        assert_eq!(out.iter().map(|(t, _)| *t).collect::<Vec<_>>(), b"DC");
        assert_eq!(out[1].1.chunk(), b"SELECT 1\0");
        assert!(session.backend().flags[0].is_released());
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Executed { cursor: false });

        // exhausted portal answers with no rows
        let out = messages(session.handle(b'E', execute("p1", 2)).await.unwrap());
        assert_eq!(out[0].1.chunk(), b"SELECT 0\0");

        assert_eq!(types(session.handle(b'S', Bytes::new()).await.unwrap()), b"Z");
        assert_eq!(session.portal_count(), 0);
        assert_eq!(session.backend().requests.len(), 1);
    }

    #[tokio::test]
    async fn unlimited_execute() {
        let (_engine, mut session) = session(rows(3));
        session.handle(b'P', parse("", SQL, &[])).await.unwrap();
        session.handle(b'B', bind("", "", 7, 0)).await.unwrap();

        let out = messages(session.handle(b'E', execute("", 0)).await.unwrap());
        assert_eq!(out.iter().map(|(t, _)| *t).collect::<Vec<_>>(), b"DDDC");
        // text result format
        assert_eq!(out[2].1.chunk(), b"\0\x02\0\0\0\x013\0\0\0\x03row");
        assert_eq!(out[3].1.chunk(), b"SELECT 3\0");
        assert!(!session.backend().requests[0].cursor);
        assert!(session.backend().flags[0].is_released());
    }

    #[tokio::test]
    async fn describe_statement() {
        let (_engine, mut session) = session(vec![]);
        session.handle(b'P', parse("s1", SQL, &[20])).await.unwrap();

        let out = messages(session.handle(b'D', named(b'S', "s1")).await.unwrap());
        assert_eq!(out.iter().map(|(t, _)| *t).collect::<Vec<_>>(), b"tT");
        assert_eq!(out[0].1.chunk(), b"\0\x01\0\0\0\x14");

        session.backend.prepared = Described::default();
        session.handle(b'P', parse("s2", "create table t (id int)", &[])).await.unwrap();
        let out = messages(session.handle(b'D', named(b'S', "s2")).await.unwrap());
        assert_eq!(out.iter().map(|(t, _)| *t).collect::<Vec<_>>(), b"tn");
        assert_eq!(out[0].1.chunk(), b"\0\0");
    }

    #[tokio::test]
    async fn affected_rows() {
        let (_engine, mut session) = session(vec![]);
        session.backend.affected = Some(3);
        session.handle(b'P', parse("", "INSERT INTO t VALUES ($1)", &[])).await.unwrap();
        session.handle(b'B', bind("", "", 1, 0)).await.unwrap();

        let out = messages(session.handle(b'E', execute("", 0)).await.unwrap());
        assert_eq!(out[0].0, b'C');
        assert_eq!(out[0].1.chunk(), b"INSERT 0 3\0");
    }

    #[tokio::test]
    async fn skip_until_sync() {
        let (_engine, mut session) = session(rows(1));

        let out = messages(session.handle(b'B', bind("", "missing", 1, 0)).await.unwrap());
        assert_eq!(out[0].0, b'E');
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"C26000"));

        // discarded
        assert!(session.handle(b'P', parse("s1", SQL, &[])).await.unwrap().is_empty());
        assert!(session.statement("s1").is_none());

        assert_eq!(types(session.handle(b'S', Bytes::new()).await.unwrap()), b"Z");
        assert_eq!(types(session.handle(b'P', parse("s1", SQL, &[])).await.unwrap()), b"1");

        let out = messages(session.handle(b'E', execute("nope", 0)).await.unwrap());
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"C34000"));

        session.handle(b'S', Bytes::new()).await.unwrap();
        let out = messages(session.handle(b'P', parse("s1", SQL, &[])).await.unwrap());
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"C42P05"));

        session.handle(b'S', Bytes::new()).await.unwrap();
        let out = messages(session.handle(b'P', parse("s2", "bogus", &[])).await.unwrap());
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"C42601"));
    }

    #[tokio::test]
    async fn bad_parameters() {
        let (_engine, mut session) = session(rows(1));
        session.handle(b'P', parse("s1", SQL, &[])).await.unwrap();

        // two values for one parameter
        let mut body = BytesMut::new();
        body.put_slice(b"\0s1\0\0\0\0\x02\0\0\0\x011\0\0\0\x012\0\0");
        let out = messages(session.handle(b'B', body.freeze()).await.unwrap());
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"CHY004"));
        session.handle(b'S', Bytes::new()).await.unwrap();

        // int4 in text format
        let mut body = BytesMut::new();
        body.put_slice(b"\0s1\0\0\0\0\x01\0\0\0\x03abc\0\0");
        let out = messages(session.handle(b'B', body.freeze()).await.unwrap());
        assert!(out[0].1.chunk().windows(6).any(|w| w == b"C22018"));
        assert_eq!(session.portal_count(), 0);
    }

    #[tokio::test]
    async fn close_and_sync() {
        let (engine, mut session) = session(rows(5));
        let conn = session.connection().id();

        session.handle(b'P', parse("s1", SQL, &[])).await.unwrap();
        session.handle(b'B', bind("p1", "s1", 0, 0)).await.unwrap();
        session.handle(b'E', execute("p1", 1)).await.unwrap();
        assert_eq!(engine.registry().cursor_count(conn), 1);

        assert_eq!(types(session.handle(b'S', Bytes::new()).await.unwrap()), b"Z");
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert!(session.backend().flags[0].is_released());
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Executed { cursor: false });

        session.handle(b'B', bind("p2", "s1", 0, 0)).await.unwrap();
        session.handle(b'E', execute("p2", 1)).await.unwrap();
        assert_eq!(types(session.handle(b'C', named(b'S', "s1")).await.unwrap()), b"3");
        assert_eq!(session.portal_count(), 0);
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert!(session.statement("s1").is_none());
        assert_eq!(session.backend().freed.len(), 1);

        // closing twice is fine
        assert_eq!(types(session.handle(b'C', named(b'S', "s1")).await.unwrap()), b"3");
    }

    #[tokio::test]
    async fn interleaved_portals() {
        let (engine, mut session) = session(rows(3));
        let conn = session.connection().id();
        session.handle(b'P', parse("s1", SQL, &[])).await.unwrap();
        session.handle(b'B', bind("p1", "s1", 0, 0)).await.unwrap();
        assert_eq!(types(session.handle(b'E', execute("p1", 2)).await.unwrap()), b"DDs");

        // a second portal of the same statement while p1 still has rows
        assert_eq!(types(session.handle(b'B', bind("p2", "s1", 1, 0)).await.unwrap()), b"2");
        assert_eq!(types(session.handle(b'E', execute("p2", 2)).await.unwrap()), b"DDs");
        assert_eq!(engine.registry().cursor_count(conn), 2);
        assert_eq!(session.backend().requests[1].params, [Value::Int(1)]);

        // p1 ends first, the statement still has p2 open
        assert_eq!(types(session.handle(b'E', execute("p1", 2)).await.unwrap()), b"DC");
        assert!(session.backend().flags[0].is_released());
        assert!(!session.backend().flags[1].is_released());
        assert_eq!(engine.registry().cursor_count(conn), 1);
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Executed { cursor: true });

        // closing the last portal releases its cursor
        assert_eq!(types(session.handle(b'C', named(b'P', "p2")).await.unwrap()), b"3");
        assert!(session.backend().flags[1].is_released());
        assert_eq!(engine.registry().cursor_count(conn), 0);
        assert_eq!(session.statement("s1").unwrap().state(), StatementState::Executed { cursor: false });
        assert_eq!(types(session.handle(b'S', Bytes::new()).await.unwrap()), b"Z");
    }

    #[tokio::test]
    async fn fatal_errors() {
        let (_engine, mut session) = session(vec![]);
        let err = session.handle(b'Q', Bytes::from_static(b"select 1\0")).await.unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn tags() {
        assert_eq!(command_tag("  select 1"), ("SELECT".into(), true));
        assert_eq!(command_tag("insert into t values (1)"), ("INSERT".into(), true));
        assert_eq!(command_tag("WITH x AS (select 1) select * from x"), ("SELECT".into(), true));
        assert_eq!(command_tag("create table t (id int)"), ("CREATE".into(), false));
        assert_eq!(command_tag("commit;"), ("COMMIT".into(), false));
    }
}
