use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use super::{
    ColumnType, PROTOCOL_VERSION13, protocol_version,
    codec::CodecContext,
    packet::{Execute, Fetch, FetchResponse, FreeOption, FreeStatement, Prepare, Request, Response, SqlResponse},
};
use crate::{
    Result,
    codec::FramingError,
    engine::Connection,
    fetch::{self, Batch},
    registry::Cursor,
    source::{Backend, BlobStore, ExecuteRequest, Execution},
    statement::{LookupError, StateError, Statement, StatementId, StatementTable},
};

/// Firebird statement command loop of one connection.
///
/// Feed each received packet to [`handle`][FirebirdSession::handle] and send
/// back the returned bytes. Statement scoped errors are answered with an
/// error [`Response`], an `Err` means the connection must be closed.
pub struct FirebirdSession<B> {
    conn: Connection,
    statements: StatementTable<ColumnType>,
    backend: B,
    version: u32,
    blobs: Option<Arc<dyn BlobStore>>,
}

fn codec_context<'a>(conn: &'a Connection, blobs: &'a Option<Arc<dyn BlobStore>>) -> CodecContext<'a> {
    CodecContext {
        charset: conn.config().charset,
        pool: conn.pool(),
        blobs: blobs.as_deref(),
        max_blob_size: conn.config().max_blob_size,
    }
}

impl<B: Backend> FirebirdSession<B> {
    pub fn new(conn: Connection, backend: B) -> Self {
        let version = conn.config().firebird_protocol;
        Self { conn, statements: StatementTable::new(), backend, version, blobs: None }
    }

    /// Resolve BLOB parameters through `blobs`.
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Protocol version accepted by the handshake, with or without
    /// [`FB_PROTOCOL_FLAG`][super::FB_PROTOCOL_FLAG].
    pub fn set_protocol_version(&mut self, raw: u32) -> Result<()> {
        let version = protocol_version(raw);
        if version < PROTOCOL_VERSION13 {
            return Err(FramingError::UnsupportedVersion { dialect: "firebird", version }.into());
        }
        self.version = version;
        Ok(())
    }

    pub fn protocol_version(&self) -> u32 {
        self.version
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn statement(&self, id: StatementId) -> Option<&Statement<ColumnType>> {
        self.statements.get(id)
    }

    /// Handle one packet, returns the reply.
    pub async fn handle(&mut self, packet: Bytes) -> Result<BytesMut> {
        let mut out = BytesMut::new();
        let result = match self.decode(packet) {
            Ok(request) => self.dispatch(request, &mut out).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(out),
            Err(err) if err.is_connection_fatal() => {
                tracing::warn!(conn = %self.conn.id(), %err, "firebird protocol error");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(conn = %self.conn.id(), %err, "statement error");
                out.clear();
                Response::error(&err).encode(&mut out);
                Ok(out)
            }
        }
    }

    pub fn decode(&self, packet: Bytes) -> Result<Request> {
        Request::decode(packet, self.version, &codec_context(&self.conn, &self.blobs))
    }

    /// Run a decoded request, writing its reply to `out`.
    pub async fn dispatch(&mut self, request: Request, out: &mut BytesMut) -> Result<()> {
        match request {
            Request::AllocateStatement(_) => {
                self.allocate(out);
                Ok(())
            }
            Request::Prepare(prepare) => self.prepare(prepare, out).await,
            Request::Execute(execute) => self.execute(execute, out).await,
            Request::Fetch(fetch) => self.fetch(fetch, out).await,
            Request::FreeStatement(free) => self.free(free, out),
        }
    }

    fn allocate(&mut self, out: &mut BytesMut) {
        let id = self.statements.allocate().id();
        tracing::debug!(conn = %self.conn.id(), stmt = %id, "statement allocated");
        Response::ok(id.0).encode(out);
    }

    async fn prepare(&mut self, prepare: Prepare, out: &mut BytesMut) -> Result<()> {
        let id = prepare.statement_id;
        let statement = self.statements.get_mut(id).ok_or(LookupError::UnknownStatement(id))?;
        if statement.has_cursor() {
            return Err(StateError::CursorOpen(id).into());
        }

        let prepared = self.backend.prepare(id, &prepare.sql).await?;
        statement.unprepare()?;
        statement.set_prepared(prepared);

        Response::ok(id.0).encode(out);
        Ok(())
    }

    async fn execute(&mut self, execute: Execute, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        let id = execute.statement_id;
        let statement = self.statements.get_mut(id).ok_or(LookupError::UnknownStatement(id))?;
        statement.bind(
            execute.transaction_id,
            execute.parameter_types,
            execute.output_types,
            execute.extras,
        )?;

        let request = ExecuteRequest {
            statement: id,
            transaction_id: execute.transaction_id,
            params: execute.parameters,
            extras: execute.extras,
            cursor: !execute.procedure,
        };
        let execution = self.backend.execute(request).await?;
        let cx = codec_context(&self.conn, &self.blobs);

        match execution {
            Execution::Rows(source) if execute.procedure => {
                // a procedure answers with at most one output row
                let mut cursor = Cursor::new(source);
                let output = match cursor.advance().await? {
                    true => Some(cursor.current_row().to_vec()),
                    false => None,
                };
                drop(cursor);
                statement.executed(false)?;
                SqlResponse { output: output.as_deref() }.encode(out, &cx)?;
            }
            Execution::Rows(source) => {
                self.conn.registry().register_statement(conn, id, Cursor::new(source).into_handle())?;
                statement.executed(true)?;
                tracing::debug!(%conn, stmt = %id, "cursor opened");
            }
            Execution::Affected(rows) => {
                statement.executed(false)?;
                tracing::debug!(%conn, stmt = %id, rows, "statement executed");
            }
            Execution::Output(row) => {
                statement.executed(false)?;
                if execute.procedure {
                    SqlResponse { output: Some(&row) }.encode(out, &cx)?;
                }
            }
        }

        Response::ok(id.0).encode(out);
        Ok(())
    }

    async fn fetch(&mut self, request: Fetch, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        let id = request.statement_id;
        if let Some(statement) = self.statements.get_mut(id) {
            statement.begin_fetch();
        }

        let batch = Batch::rows_or(request.count, self.conn.config().fetch_size);
        let mut protocol = FetchResponse::new(codec_context(&self.conn, &self.blobs));
        let result = fetch::fetch(self.conn.registry(), conn, id, batch, &mut protocol, out).await;

        let exhausted = matches!(&result, Ok(fetched) if fetched.end.is_terminal());
        if let Some(statement) = self.statements.get_mut(id) {
            statement.end_fetch(exhausted);
        }
        result.map(drop)
    }

    fn free(&mut self, request: FreeStatement, out: &mut BytesMut) -> Result<()> {
        let conn = self.conn.id();
        let id = request.statement_id;
        let Some(statement) = self.statements.get_mut(id) else {
            tracing::debug!(%conn, stmt = %id, "free of unknown statement");
            Response::ok(0).encode(out);
            return Ok(());
        };

        self.conn.registry().unregister_statement(conn, id);

        let handle = match request.option {
            FreeOption::Close => {
                statement.close_cursor();
                id.0
            }
            FreeOption::Unprepare => {
                statement.unprepare()?;
                id.0
            }
            FreeOption::Drop => {
                self.statements.remove(id);
                self.backend.free(id);
                tracing::debug!(%conn, stmt = %id, "statement dropped");
                0
            }
        };

        Response::ok(handle).encode(out);
        Ok(())
    }
}
