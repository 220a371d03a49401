//! Bounded batch fetch.
//!
//! A fetch pulls at most one batch of rows from the cursor of a statement and
//! terminates it with one of:
//! - [`FetchEnd::More`], the batch is full, the client must fetch again
//! - [`FetchEnd::Exhausted`], the cursor ran out of rows and was released
//! - [`FetchEnd::Absent`], no cursor is registered for the statement
//!
//! [`FetchEnd::Absent`] is written to the wire exactly like
//! [`FetchEnd::Exhausted`].
use bytes::BytesMut;
use std::num::NonZeroU32;

use crate::{
    Result,
    common::verbose,
    registry::ConnectionRegistry,
    statement::{ConnectionId, StatementId},
    value::Value,
};

/// Maximum number of rows of one fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Batch {
    Rows(NonZeroU32),
    /// Drain the cursor.
    All,
}

impl Batch {
    /// `n` rows, or `default` when the client asked for 0.
    pub fn rows_or(n: u32, default: u32) -> Batch {
        match NonZeroU32::new(n).or(NonZeroU32::new(default)) {
            Some(n) => Batch::Rows(n),
            None => Batch::All,
        }
    }

    fn is_full(&self, rows: u32) -> bool {
        match self {
            Batch::Rows(n) => rows >= n.get(),
            Batch::All => false,
        }
    }
}

/// How a fetch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchEnd {
    More,
    Exhausted,
    Absent,
}

impl FetchEnd {
    /// `true` if no more rows will follow.
    pub fn is_terminal(self) -> bool {
        !matches!(self, FetchEnd::More)
    }
}

/// Outcome of [`fetch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub rows: u32,
    pub end: FetchEnd,
}

/// Dialect row packets.
pub trait FetchProtocol {
    /// Write one row packet.
    fn encode_row(&mut self, row: &[Value], out: &mut BytesMut) -> Result<()>;

    /// Write the packet terminating a batch of `rows` rows.
    fn encode_end(&mut self, end: FetchEnd, rows: u32, out: &mut BytesMut) -> Result<()>;
}

/// Fetch one batch from the cursor of `stmt` into `out`.
///
/// On error nothing of the batch is left in `out` and the cursor stays
/// registered.
pub async fn fetch<P: FetchProtocol>(
    registry: &ConnectionRegistry,
    conn: ConnectionId,
    stmt: StatementId,
    batch: Batch,
    protocol: &mut P,
    out: &mut BytesMut,
) -> Result<Fetched> {
    let Some(handle) = registry.lookup(conn, stmt) else {
        tracing::debug!(%conn, %stmt, "fetch without open cursor");
        protocol.encode_end(FetchEnd::Absent, 0, out)?;
        return Ok(Fetched { rows: 0, end: FetchEnd::Absent });
    };

    let mut cursor = handle.lock().await;
    let start = out.len();
    let mut rows = 0;

    let end = loop {
        if batch.is_full(rows) {
            break FetchEnd::More;
        }

        let advanced = match cursor.advance().await {
            Ok(advanced) => advanced,
            Err(err) => {
                out.truncate(start);
                return Err(err.into());
            }
        };

        if !advanced {
            break FetchEnd::Exhausted;
        }

        if let Err(err) = protocol.encode_row(cursor.current_row(), out) {
            out.truncate(start);
            return Err(err);
        }

        rows += 1;
    };

    if let FetchEnd::Exhausted = end {
        cursor.release();
        drop(cursor);
        registry.unregister_statement(conn, stmt);
        tracing::debug!(%conn, %stmt, rows, "cursor exhausted");
    }

    verbose!(%conn, %stmt, rows, ?end, "fetched");
    protocol.encode_end(end, rows, out)?;
    Ok(Fetched { rows, end })
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::{
        codec::CodecError,
        registry::Cursor,
        source::{ReleaseFlag, VecSource},
    };

    /// One byte per packet: `R` row, `M` more, `E` end.
    struct Marker;

    impl FetchProtocol for Marker {
        fn encode_row(&mut self, row: &[Value], out: &mut BytesMut) -> Result<()> {
            if row.first().is_some_and(Value::is_null) {
                return Err(CodecError::unsupported("NULL first cell").into());
            }
            out.put_u8(b'R');
            Ok(())
        }

        fn encode_end(&mut self, end: FetchEnd, _: u32, out: &mut BytesMut) -> Result<()> {
            out.put_u8(if end.is_terminal() { b'E' } else { b'M' });
            Ok(())
        }
    }

    const CONN: ConnectionId = ConnectionId(1);
    const STMT: StatementId = StatementId(5);

    fn setup(rows: Vec<Vec<Value>>) -> (ConnectionRegistry, ReleaseFlag) {
        let registry = ConnectionRegistry::new();
        registry.register_connection(CONN);
        let source = VecSource::new(rows);
        let flag = source.release_flag();
        let handle = Cursor::new(Box::new(source)).into_handle();
        registry.register_statement(CONN, STMT, handle).unwrap();
        (registry, flag)
    }

    fn rows(m: usize) -> Vec<Vec<Value>> {
        (0..m).map(|i| vec![Value::Long(i as i64)]).collect()
    }

    fn batch(n: u32) -> Batch {
        Batch::Rows(NonZeroU32::new(n).unwrap())
    }

    #[tokio::test]
    async fn batching() {
        for m in 0..6 {
            for n in 1..6u32 {
                let (registry, flag) = setup(rows(m));
                let mut out = BytesMut::new();
                let fetched = fetch(&registry, CONN, STMT, batch(n), &mut Marker, &mut out)
                    .await
                    .unwrap();

                if m >= n as usize {
                    assert_eq!(fetched, Fetched { rows: n, end: FetchEnd::More });
                    assert_eq!(out.len(), n as usize + 1);
                    assert_eq!(out.last(), Some(&b'M'));
                    assert!(!flag.is_released());
                    assert!(registry.lookup(CONN, STMT).is_some());
                } else {
                    assert_eq!(fetched, Fetched { rows: m as u32, end: FetchEnd::Exhausted });
                    assert_eq!(out.len(), m + 1);
                    assert_eq!(out.last(), Some(&b'E'));
                    assert!(flag.is_released());
                    assert!(registry.lookup(CONN, STMT).is_none());
                }
            }
        }
    }

    #[tokio::test]
    async fn continues_across_batches() {
        let (registry, flag) = setup(rows(5));
        let mut out = BytesMut::new();
        let a = fetch(&registry, CONN, STMT, batch(2), &mut Marker, &mut out).await.unwrap();
        let b = fetch(&registry, CONN, STMT, batch(2), &mut Marker, &mut out).await.unwrap();
        let c = fetch(&registry, CONN, STMT, batch(2), &mut Marker, &mut out).await.unwrap();
        assert_eq!((a.end, b.end, c.end), (FetchEnd::More, FetchEnd::More, FetchEnd::Exhausted));
        assert_eq!(c.rows, 1);
        assert_eq!(&out[..], b"RRMRRMRE");
        assert!(flag.is_released());

        let d = fetch(&registry, CONN, STMT, batch(2), &mut Marker, &mut out).await.unwrap();
        assert_eq!(d, Fetched { rows: 0, end: FetchEnd::Absent });
    }

    #[tokio::test]
    async fn absent_cursor_is_terminal() {
        let registry = ConnectionRegistry::new();
        let mut out = BytesMut::new();
        let fetched = fetch(&registry, CONN, STMT, Batch::All, &mut Marker, &mut out).await.unwrap();
        assert_eq!(fetched.end, FetchEnd::Absent);
        assert_eq!(&out[..], b"E");
    }

    #[tokio::test]
    async fn drain_all() {
        let (registry, flag) = setup(rows(3));
        let mut out = BytesMut::new();
        let fetched = fetch(&registry, CONN, STMT, Batch::All, &mut Marker, &mut out).await.unwrap();
        assert_eq!(fetched, Fetched { rows: 3, end: FetchEnd::Exhausted });
        assert!(flag.is_released());
    }

    #[tokio::test]
    async fn encode_error_discards_batch() {
        let (registry, flag) = setup(vec![vec![Value::Int(1)], vec![Value::Null]]);
        let mut out = BytesMut::from(&b"prior"[..]);
        let err = fetch(&registry, CONN, STMT, batch(5), &mut Marker, &mut out).await.unwrap_err();
        assert!(!err.is_connection_fatal());
        assert_eq!(&out[..], b"prior");
        assert!(!flag.is_released());
        assert!(registry.lookup(CONN, STMT).is_some());
    }

    #[test]
    fn zero_rows_uses_default() {
        assert_eq!(Batch::rows_or(0, 200), batch(200));
        assert_eq!(Batch::rows_or(3, 200), batch(3));
        assert_eq!(Batch::rows_or(0, 0), Batch::All);
    }
}
