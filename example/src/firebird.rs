use bytes::{BufMut, Bytes, BytesMut};
use stmtwire::{
    Engine, Value,
    codec::{BufMutExt, Charset, Payload},
    firebird::{
        self, ColumnType, CodecContext, FETCH_NO_MORE_ROWS, FirebirdSession, blr,
        codec::{decode_row, encode_parameters},
    },
    pool::BufferPool,
};

use crate::{Result, backend::{Backend, SQL}};

const PARAMS: [ColumnType; 2] = [ColumnType::Long, ColumnType::Text];
const COLUMNS: [ColumnType; 3] = [ColumnType::Long, ColumnType::Varying, ColumnType::Date];

fn packet(opcode: u32, f: impl FnOnce(&mut BytesMut) -> Result<()>) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u32(opcode);
    f(&mut buf)?;
    Ok(buf.freeze())
}

/// Handle carried by an `op_response`.
fn response(out: BytesMut) -> Result<u32> {
    let mut payload = Payload::new(out.freeze());
    if payload.get_u32()? != firebird::OP_RESPONSE {
        return Err("expected op_response".into());
    }
    let handle = payload.get_u32()?;
    payload.skip_reserved(8)?;
    payload.get_var_buffer()?;
    match payload.get_u32()? {
        0 => Ok(handle),
        _ => Err("statement failed".into()),
    }
}

pub async fn main(engine: &Engine) -> Result<()> {
    let pool = BufferPool::new(1, 256);
    let cx = CodecContext { charset: Charset::Utf8, pool: &pool, blobs: None, max_blob_size: 256 };
    let mut session = FirebirdSession::new(engine.accept(), Backend::new());
    session.set_protocol_version(firebird::PROTOCOL_VERSION19)?;

    let out = session.handle(packet(firebird::OP_ALLOCATE_STATEMENT, |buf| {
        buf.put_u32(0);
        Ok(())
    })?).await?;
    let stmt = response(out)?;
    tracing::info!(stmt, "allocated");

    let prepare = packet(firebird::OP_PREPARE_STATEMENT, |buf| {
        buf.put_u32(1);
        buf.put_u32(stmt);
        buf.put_u32(3);
        buf.put_var_buffer(SQL.as_bytes());
        buf.put_var_buffer(&[]);
        buf.put_u32(1024);
        Ok(())
    })?;
    response(session.handle(prepare).await?)?;

    let execute = packet(firebird::OP_EXECUTE, |buf| {
        buf.put_u32(stmt);
        buf.put_u32(1);
        buf.put_var_buffer(&blr::build(&PARAMS)?);
        buf.put_u32(0);
        buf.put_u32(1);
        encode_parameters(&[Value::Int(42), Value::from("abc")], &PARAMS, buf, &cx)?;
        // timeout, cursor flags, max blob size
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        Ok(())
    })?;
    response(session.handle(execute).await?)?;

    let fetch = packet(firebird::OP_FETCH, |buf| {
        buf.put_u32(stmt);
        buf.put_var_buffer(&blr::build(&COLUMNS)?);
        buf.put_u32(0);
        buf.put_u32(3);
        Ok(())
    })?;
    let mut payload = Payload::new(session.handle(fetch).await?.freeze());
    loop {
        if payload.get_u32()? != firebird::OP_FETCH_RESPONSE {
            return Err("expected op_fetch_response".into());
        }
        let status = payload.get_u32()?;
        if payload.get_u32()? == 0 {
            tracing::info!(status, done = status == FETCH_NO_MORE_ROWS, "fetch end");
            break;
        }
        let row = decode_row(&mut payload, &COLUMNS, &cx)?;
        tracing::info!(?row, "row");
    }

    let free = packet(firebird::OP_FREE_STATEMENT, |buf| {
        buf.put_u32(stmt);
        buf.put_u32(firebird::DSQL_DROP);
        Ok(())
    })?;
    response(session.handle(free).await?)?;
    tracing::info!(cursors = engine.registry().cursor_count(session.connection().id()), "freed");

    Ok(())
}
