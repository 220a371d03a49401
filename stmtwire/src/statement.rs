//! Statement lifecycle.
//!
//! ```text
//! Allocated -> Bound -> Executed(no cursor)
//!                    -> Executed(cursor) <-> Fetching
//! any -> Closed
//! ```
use std::{collections::HashMap, fmt};

use crate::{
    common::ByteStr,
    source::{ColumnDef, Prepared},
};

macro_rules! id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0).finish()
            }
        }
    };
}

id! {
    /// Statement id, scoped to its connection.
    StatementId
}

id! {
    /// Connection id, assigned by [`Engine`][crate::Engine].
    ConnectionId
}

/// Unknown statement, connection, or name.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("unknown statement {0}")]
    UnknownStatement(StatementId),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("prepared statement \"{0}\" does not exist")]
    UnknownPreparedStatement(ByteStr),
    #[error("portal \"{0}\" does not exist")]
    UnknownPortal(ByteStr),
    #[error("prepared statement \"{0}\" already exists")]
    DuplicatePreparedStatement(ByteStr),
    #[error("portal \"{0}\" already exists")]
    DuplicatePortal(ByteStr),
}

impl LookupError {
    /// Unknown ids mean the client and the engine disagree on state,
    /// unknown names are ordinary client mistakes.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::UnknownStatement(_) | Self::UnknownConnection(_))
    }

    pub fn sqlstate(&self) -> &'static str {
        match self {
            Self::UnknownPortal(_) => "34000",
            Self::DuplicatePreparedStatement(_) => "42P05",
            Self::DuplicatePortal(_) => "42P03",
            _ => "26000",
        }
    }
}

/// Request not valid in the current state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("statement {0} already has an open cursor")]
    CursorOpen(StatementId),
    #[error("statement {id} cannot {action} while {state}")]
    InvalidTransition {
        id: StatementId,
        state: StatementState,
        action: &'static str,
    },
}

/// Lifecycle state of a [`Statement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementState {
    Allocated,
    /// Parameters decoded.
    Bound,
    Executed { cursor: bool },
    Fetching,
    Closed,
}

impl fmt::Display for StatementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allocated => "allocated",
            Self::Bound => "bound",
            Self::Executed { cursor: false } => "executed",
            Self::Executed { cursor: true } => "executed with open cursor",
            Self::Fetching => "fetching",
            Self::Closed => "closed",
        })
    }
}

/// Fields only present above some negotiated protocol version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extras {
    /// Statement timeout in milliseconds.
    pub timeout: Option<u32>,
    pub cursor_flags: Option<u32>,
    pub max_blob_size: Option<u32>,
}

/// A server side statement, `T` is the dialect parameter type.
#[derive(Debug)]
pub struct Statement<T> {
    id: StatementId,
    transaction_id: u32,
    state: StatementState,
    parameter_types: Vec<T>,
    output_types: Option<Vec<T>>,
    prepared: Prepared,
    extras: Extras,
}

impl<T> Statement<T> {
    pub fn new(id: StatementId) -> Statement<T> {
        Self {
            id,
            transaction_id: 0,
            state: StatementState::Allocated,
            parameter_types: Vec::new(),
            output_types: None,
            prepared: Prepared::default(),
            extras: Extras::default(),
        }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn parameter_types(&self) -> &[T] {
        &self.parameter_types
    }

    /// Output columns of a stored procedure execute.
    pub fn output_types(&self) -> Option<&[T]> {
        self.output_types.as_deref()
    }

    pub fn extras(&self) -> Extras {
        self.extras
    }

    pub fn params(&self) -> &[ColumnDef] {
        &self.prepared.params
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.prepared.columns
    }

    pub fn has_cursor(&self) -> bool {
        matches!(self.state, StatementState::Executed { cursor: true } | StatementState::Fetching)
    }

    fn invalid(&self, action: &'static str) -> StateError {
        StateError::InvalidTransition { id: self.id, state: self.state, action }
    }

    /// Record metadata reported by the backend.
    pub fn set_prepared(&mut self, prepared: Prepared) {
        self.prepared = prepared;
    }

    /// Enter [`Bound`][StatementState::Bound] with freshly decoded types.
    pub fn bind(
        &mut self,
        transaction_id: u32,
        parameter_types: Vec<T>,
        output_types: Option<Vec<T>>,
        extras: Extras,
    ) -> Result<(), StateError> {
        match self.state {
            StatementState::Allocated | StatementState::Bound | StatementState::Executed { cursor: false } => {}
            StatementState::Executed { cursor: true } | StatementState::Fetching => {
                return Err(StateError::CursorOpen(self.id));
            }
            StatementState::Closed => return Err(self.invalid("bind")),
        }
        self.transaction_id = transaction_id;
        self.parameter_types = parameter_types;
        self.output_types = output_types;
        self.extras = extras;
        self.state = StatementState::Bound;
        Ok(())
    }

    /// Rebind keeping the previously bound types.
    pub fn rebind(&mut self, extras: Extras) -> Result<(), StateError> {
        let parameter_types = std::mem::take(&mut self.parameter_types);
        let output_types = self.output_types.take();
        let transaction_id = self.transaction_id;
        let result = self.bind(transaction_id, Vec::new(), None, extras);
        self.parameter_types = parameter_types;
        self.output_types = output_types;
        result
    }

    /// Bound statement was executed, `cursor` if it produced a result set.
    pub fn executed(&mut self, cursor: bool) -> Result<(), StateError> {
        if self.state != StatementState::Bound {
            return Err(self.invalid("execute"));
        }
        self.state = StatementState::Executed { cursor };
        Ok(())
    }

    /// A fetch batch begins, returns `false` if no cursor is open.
    pub fn begin_fetch(&mut self) -> bool {
        if self.has_cursor() {
            self.state = StatementState::Fetching;
        }
        self.state == StatementState::Fetching
    }

    /// A fetch batch ended.
    pub fn end_fetch(&mut self, exhausted: bool) {
        if self.state == StatementState::Fetching {
            self.state = StatementState::Executed { cursor: !exhausted };
        }
    }

    /// Cursor closed, the statement can be executed again.
    pub fn close_cursor(&mut self) {
        if self.has_cursor() {
            self.state = StatementState::Executed { cursor: false };
        }
    }

    /// Forget the prepared sql and bound types, the id stays allocated.
    pub fn unprepare(&mut self) -> Result<(), StateError> {
        if self.state == StatementState::Closed {
            return Err(self.invalid("unprepare"));
        }
        self.parameter_types.clear();
        self.output_types = None;
        self.prepared = Prepared::default();
        self.extras = Extras::default();
        self.state = StatementState::Allocated;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = StatementState::Closed;
    }
}

/// Statements owned by one connection.
#[derive(Debug)]
pub struct StatementTable<T> {
    statements: HashMap<StatementId, Statement<T>>,
    next_id: u32,
}

impl<T> Default for StatementTable<T> {
    fn default() -> Self {
        Self { statements: HashMap::new(), next_id: 1 }
    }
}

impl<T> StatementTable<T> {
    pub fn new() -> StatementTable<T> {
        Self::default()
    }

    /// Allocate a statement with an unused id.
    pub fn allocate(&mut self) -> &mut Statement<T> {
        let mut id = StatementId(self.next_id);
        while id.0 == 0 || self.statements.contains_key(&id) {
            id.0 = id.0.wrapping_add(1);
        }
        self.next_id = id.0.wrapping_add(1);
        self.statements.entry(id).or_insert_with(|| Statement::new(id))
    }

    pub fn get(&self, id: StatementId) -> Option<&Statement<T>> {
        self.statements.get(&id)
    }

    pub fn get_mut(&mut self, id: StatementId) -> Option<&mut Statement<T>> {
        self.statements.get_mut(&id)
    }

    /// Close and remove a statement.
    pub fn remove(&mut self, id: StatementId) -> Option<Statement<T>> {
        let mut statement = self.statements.remove(&id)?;
        statement.close();
        Some(statement)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
