use bytes::{BufMut, Bytes, BytesMut};
use stmtwire::{
    Engine, Value,
    codec::{BufMutExt, Charset, Payload},
    postgres::{PgFormat, PgSession, PgType, codec},
};

use crate::{Result, backend::Backend};

const SQL: &str = "select id, name, joined from users where id < $1 and name <> $2";

fn messages(out: BytesMut) -> Result<Vec<(u8, Payload)>> {
    let mut payload = Payload::new(out.freeze());
    let mut messages = vec![];
    while !payload.is_empty() {
        let msgtype = payload.get_u8()?;
        let len = payload.get_u32()? as usize;
        messages.push((msgtype, payload.split_payload(len.saturating_sub(4))?));
    }
    Ok(messages)
}

fn body(f: impl FnOnce(&mut BytesMut) -> Result<()>) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    f(&mut buf)?;
    Ok(buf.freeze())
}

pub async fn main(engine: &Engine) -> Result<()> {
    let mut session = PgSession::new(engine.accept(), Backend::new());
    let columns = Backend::columns().iter().map(|col| PgType::from_kind(col.kind)).collect::<Vec<_>>();

    let parse = body(|buf| {
        buf.put_nul_string("users");
        buf.put_nul_string(SQL);
        buf.put_u16(2);
        buf.put_u32(PgType::Int4.oid());
        buf.put_u32(PgType::Text.oid());
        Ok(())
    })?;
    session.handle(b'P', parse).await?;

    let bind = body(|buf| {
        buf.put_nul_string("cursor");
        buf.put_nul_string("users");
        buf.put_u16(1);
        buf.put_u16(PgFormat::Binary.format_code());
        buf.put_u16(2);
        for param in [Value::Int(42), Value::from("abc")] {
            let offset = buf.len();
            buf.put_i32(0);
            codec::encode(&param, PgFormat::Binary, buf, Charset::Utf8)?;
            let len = i32::try_from(buf.len() - offset - 4)?;
            buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
        }
        buf.put_u16(1);
        buf.put_u16(PgFormat::Binary.format_code());
        Ok(())
    })?;
    session.handle(b'B', bind).await?;

    let execute = body(|buf| {
        buf.put_nul_string("cursor");
        buf.put_u32(3);
        Ok(())
    })?;
    for (msgtype, mut payload) in messages(session.handle(b'E', execute).await?)? {
        match msgtype {
            b'D' => {
                let mut row = vec![];
                for ty in columns.iter().copied().take(usize::from(payload.get_u16()?)) {
                    let value = match payload.get_i32()? {
                        -1 => Value::Null,
                        len => codec::decode(payload.get_bytes(usize::try_from(len)?)?, ty, PgFormat::Binary, Charset::Utf8)?,
                    };
                    row.push(value);
                }
                tracing::info!(?row, "row");
            }
            b'C' => tracing::info!(tag = ?payload.get_nul_bytestr()?, "command complete"),
            b's' => tracing::info!("portal suspended"),
            msgtype => tracing::warn!(msgtype = %char::from(msgtype), "unexpected message"),
        }
    }

    session.handle(b'C', body(|buf| {
        buf.put_u8(b'S');
        buf.put_nul_string("users");
        Ok(())
    })?).await?;
    session.handle(b'S', Bytes::new()).await?;
    tracing::info!(
        cursors = engine.registry().cursor_count(session.connection().id()),
        portals = session.portal_count(),
        "synced",
    );

    Ok(())
}
