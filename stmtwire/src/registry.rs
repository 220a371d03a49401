//! Per connection cursor registry.
use dashmap::DashMap;
use std::{collections::HashMap, sync::Arc};

use crate::{
    source::{BackendError, ResultSource, ResultSourceExt},
    statement::{ConnectionId, LookupError, StatementId},
    value::Value,
};

/// Shared handle to an open cursor.
pub type ResultHandle = Arc<tokio::sync::Mutex<Cursor>>;

/// A live result source and its fetch position.
///
/// The source is released exactly once, explicitly or when the cursor drops.
pub struct Cursor {
    source: Box<dyn ResultSource>,
    position: u64,
    released: bool,
}

impl Cursor {
    pub fn new(source: Box<dyn ResultSource>) -> Cursor {
        Self { source, position: 0, released: false }
    }

    pub fn into_handle(self) -> ResultHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Number of rows produced so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Move to the next row, a released cursor has no more rows.
    pub async fn advance(&mut self) -> Result<bool, BackendError> {
        if self.released {
            return Ok(false);
        }
        let more = self.source.advance().await?;
        if more {
            self.position += 1;
        }
        Ok(more)
    }

    pub fn current_row(&self) -> &[Value] {
        self.source.current_row()
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .field("released", &self.released)
            .finish()
    }
}

/// Directory from connection to statement to open cursor.
///
/// The outer map is shared by every connection task. The inner map of a
/// connection is only mutated by the task driving that connection, under
/// the shard lock of the outer map, never across an await.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, HashMap<StatementId, ResultHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        Self::default()
    }

    pub fn register_connection(&self, conn: ConnectionId) {
        self.connections.entry(conn).or_default();
        tracing::debug!(%conn, "connection registered");
    }

    /// Register the cursor of a statement, replacing any previous one.
    pub fn register_statement(
        &self,
        conn: ConnectionId,
        stmt: StatementId,
        handle: ResultHandle,
    ) -> Result<(), LookupError> {
        let previous = {
            let Some(mut statements) = self.connections.get_mut(&conn) else {
                return Err(LookupError::UnknownConnection(conn));
            };
            statements.insert(stmt, handle)
        };
        if previous.is_some() {
            tracing::debug!(%conn, %stmt, "cursor replaced");
        }
        Ok(())
    }

    pub fn lookup(&self, conn: ConnectionId, stmt: StatementId) -> Option<ResultHandle> {
        self.connections.get(&conn)?.get(&stmt).cloned()
    }

    pub fn unregister_statement(&self, conn: ConnectionId, stmt: StatementId) -> Option<ResultHandle> {
        self.connections.get_mut(&conn)?.remove(&stmt)
    }

    /// Remove a connection and every cursor it owns.
    ///
    /// Returns the number of cursors dropped.
    pub fn unregister_connection(&self, conn: ConnectionId) -> usize {
        let Some((_, statements)) = self.connections.remove(&conn) else {
            return 0;
        };
        let count = statements.len();
        drop(statements);
        tracing::debug!(%conn, cursors = count, "connection unregistered");
        count
    }

    pub fn is_registered(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of open cursors of a connection.
    pub fn cursor_count(&self, conn: ConnectionId) -> usize {
        self.connections.get(&conn).map_or(0, |statements| statements.len())
    }
}
