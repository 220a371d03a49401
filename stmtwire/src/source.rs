//! Contracts of the sql execution collaborator.
//!
//! The engine never executes sql, it drives a [`Backend`] and pulls rows from
//! the [`ResultSource`] it returns.
use bytes::Bytes;
use std::{
    borrow::Cow,
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use crate::{
    common::ByteStr,
    statement::{Extras, StatementId},
    value::{Value, ValueKind},
};

/// Error reported by the sql execution collaborator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    sqlstate: Cow<'static, str>,
    message: Cow<'static, str>,
}

impl BackendError {
    pub fn new(sqlstate: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
        Self { sqlstate: sqlstate.into(), message: message.into() }
    }

    pub fn sqlstate(&self) -> &str {
        &self.sqlstate
    }
}

/// A live result set.
pub trait ResultSource: Send {
    /// Poll to move to the next row.
    ///
    /// Returns `false` when the result set is exhausted.
    fn poll_advance(&mut self, cx: &mut Context) -> Poll<Result<bool, BackendError>>;

    /// Cells of the current row.
    ///
    /// Only valid after [`poll_advance`][ResultSource::poll_advance] returned `true`.
    fn current_row(&self) -> &[Value];

    /// Give back the underlying resource.
    fn release(&mut self);
}

impl<S: ResultSource + ?Sized> ResultSource for Box<S> {
    fn poll_advance(&mut self, cx: &mut Context) -> Poll<Result<bool, BackendError>> {
        S::poll_advance(self, cx)
    }

    fn current_row(&self) -> &[Value] {
        S::current_row(self)
    }

    fn release(&mut self) {
        S::release(self);
    }
}

/// An extension trait to provide `Future` API for [`ResultSource`].
pub trait ResultSourceExt: ResultSource {
    /// Move to the next row.
    fn advance(&mut self) -> impl Future<Output = Result<bool, BackendError>> {
        std::future::poll_fn(|cx| self.poll_advance(cx))
    }
}

impl<T> ResultSourceExt for T where T: ResultSource + ?Sized { }

/// Resolves BLOB ids into their content.
pub trait BlobStore: Send + Sync {
    /// Segment stream of a BLOB, `None` if the id is unknown.
    ///
    /// The stream is a sequence of segments, each a 2 byte little endian
    /// length followed by that many bytes.
    fn segments(&self, blob_id: u64) -> Option<Bytes>;
}

/// Column or parameter metadata reported by [`Backend::prepare`].
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: ByteStr,
    pub kind: ValueKind,
}

impl ColumnDef {
    pub fn new(name: impl Into<ByteStr>, kind: ValueKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Result of preparing a statement.
#[derive(Clone, Debug, Default)]
pub struct Prepared {
    pub params: Vec<ColumnDef>,
    pub columns: Vec<ColumnDef>,
}

/// A bound statement handed to [`Backend::execute`].
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub statement: StatementId,
    pub transaction_id: u32,
    pub params: Vec<Value>,
    pub extras: Extras,
    /// Client asked for a cursor instead of the whole result.
    pub cursor: bool,
}

/// Result of executing a statement.
pub enum Execution {
    /// Row producing statement, becomes a cursor.
    Rows(Box<dyn ResultSource>),
    /// Statement without result set.
    Affected(u64),
    /// Output values of a stored procedure.
    Output(Vec<Value>),
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rows(_) => f.write_str("Rows"),
            Self::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
            Self::Output(row) => f.debug_tuple("Output").field(row).finish(),
        }
    }
}

/// The sql execution collaborator.
pub trait Backend: Send {
    /// Prepare `sql` for the newly allocated `statement`.
    fn prepare(
        &mut self,
        statement: StatementId,
        sql: &str,
    ) -> impl Future<Output = Result<Prepared, BackendError>> + Send;

    /// Execute a bound statement.
    fn execute(
        &mut self,
        request: ExecuteRequest,
    ) -> impl Future<Output = Result<Execution, BackendError>> + Send;

    /// Statement dropped by the client.
    fn free(&mut self, statement: StatementId) {
        let _ = statement;
    }
}

/// In memory [`ResultSource`].
#[derive(Debug, Default)]
pub struct VecSource {
    rows: VecDeque<Vec<Value>>,
    current: Vec<Value>,
    released: Arc<AtomicBool>,
}

impl VecSource {
    pub fn new(rows: impl IntoIterator<Item = Vec<Value>>) -> VecSource {
        Self { rows: rows.into_iter().collect(), ..Default::default() }
    }

    /// Handle observing whether this source has been released.
    pub fn release_flag(&self) -> ReleaseFlag {
        ReleaseFlag(Arc::clone(&self.released))
    }
}

impl ResultSource for VecSource {
    fn poll_advance(&mut self, _: &mut Context) -> Poll<Result<bool, BackendError>> {
        match self.rows.pop_front() {
            Some(row) => {
                self.current = row;
                Poll::Ready(Ok(true))
            }
            None => {
                self.current.clear();
                Poll::Ready(Ok(false))
            }
        }
    }

    fn current_row(&self) -> &[Value] {
        &self.current
    }

    fn release(&mut self) {
        self.rows.clear();
        self.current.clear();
        self.released.store(true, Ordering::Release);
    }
}

/// See [`VecSource::release_flag`].
#[derive(Debug, Clone)]
pub struct ReleaseFlag(Arc<AtomicBool>);

impl ReleaseFlag {
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
