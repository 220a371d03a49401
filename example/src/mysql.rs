use bytes::{BufMut, Bytes, BytesMut};
use stmtwire::{
    Engine, Value,
    codec::{Charset, Payload},
    mysql::{self, ColumnType, MySqlSession, SERVER_STATUS_LAST_ROW_SENT, codec},
};

use crate::{Result, backend::{Backend, SQL}};

const COLUMNS: [ColumnType; 3] = [ColumnType::Long, ColumnType::VarString, ColumnType::Date];

/// Split a response into packet payloads.
fn packets(out: BytesMut) -> Result<Vec<Payload>> {
    let mut payload = Payload::new(out.freeze());
    let mut packets = vec![];
    while !payload.is_empty() {
        let len = payload.get_u16_le()? as usize + ((payload.get_u8()? as usize) << 16);
        let _seq = payload.get_u8()?;
        packets.push(payload.split_payload(len)?);
    }
    Ok(packets)
}

fn command(com: u8, id: u32, f: impl FnOnce(&mut BytesMut) -> Result<()>) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u8(com);
    buf.put_u32_le(id);
    f(&mut buf)?;
    Ok(buf.freeze())
}

pub async fn main(engine: &Engine) -> Result<()> {
    let mut session = MySqlSession::new(engine.accept(), Backend::new());

    let mut prepare = BytesMut::new();
    prepare.put_u8(mysql::COM_STMT_PREPARE);
    prepare.put_slice(SQL.as_bytes());
    let out = packets(session.handle(prepare.freeze()).await?)?;
    let mut ok = out.first().ok_or("empty prepare response")?.clone();
    if ok.get_u8()? != 0 {
        return Err("prepare failed".into());
    }
    let id = ok.get_u32_le()?;
    tracing::info!(id, columns = ok.get_u16_le()?, params = ok.get_u16_le()?, "prepared");

    let execute = command(mysql::COM_STMT_EXECUTE, id, |buf| {
        buf.put_u8(mysql::CURSOR_TYPE_READ_ONLY);
        buf.put_u32_le(1);
        codec::encode_parameters(&[Value::Int(42), Value::from("abc")], buf, Charset::Utf8)?;
        Ok(())
    })?;
    // column count, definitions, eof
    let out = packets(session.handle(execute).await?)?;
    tracing::info!(packets = out.len(), "cursor opened");

    let fetch = command(mysql::COM_STMT_FETCH, id, |buf| {
        buf.put_u32_le(3);
        Ok(())
    })?;
    let out = packets(session.handle(fetch).await?)?;
    let Some((eof, rows)) = out.split_last() else {
        return Err("empty fetch response".into());
    };
    for row in rows {
        let row = codec::decode_row(&mut row.clone(), &COLUMNS, Charset::Utf8)?;
        tracing::info!(?row, "row");
    }
    let mut eof = eof.clone();
    eof.skip_reserved(3)?;
    let status = eof.get_u16_le()?;
    tracing::info!(status, done = status & SERVER_STATUS_LAST_ROW_SENT != 0, "fetch end");

    // no response to a close
    session.handle(command(mysql::COM_STMT_CLOSE, id, |_| Ok(()))?).await?;
    tracing::info!(cursors = engine.registry().cursor_count(session.connection().id()), "closed");

    Ok(())
}
