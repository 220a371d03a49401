//! In memory `users` table standing in for the sql execution layer.
use std::future::{Future, ready};
use stmtwire::{
    StatementId, Value, ValueKind,
    source::{self, BackendError, ColumnDef, ExecuteRequest, Execution, Prepared, VecSource},
};
use time::macros::date;

pub const SQL: &str = "select id, name, joined from users where id < ? and name <> ?";

#[derive(Debug)]
pub struct Backend {
    users: Vec<Vec<Value>>,
}

impl Backend {
    pub fn new() -> Backend {
        let users = [
            (1, "alice", date!(2024 - 01 - 12)),
            (2, "bob", date!(2024 - 06 - 30)),
            (64, "carol", date!(2025 - 02 - 01)),
        ];
        Self {
            users: users
                .into_iter()
                .map(|(id, name, joined)| vec![Value::Int(id), Value::from(name), Value::Date(joined)])
                .collect(),
        }
    }

    pub fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ValueKind::Int),
            ColumnDef::new("name", ValueKind::Text),
            ColumnDef::new("joined", ValueKind::Date),
        ]
    }
}

impl source::Backend for Backend {
    fn prepare(&mut self, statement: StatementId, sql: &str) -> impl Future<Output = Result<Prepared, BackendError>> + Send {
        tracing::debug!(%statement, sql, "prepare");
        if !sql.trim_start().to_ascii_lowercase().starts_with("select") {
            return ready(Err(BackendError::new("42601", "only select is supported")));
        }
        ready(Ok(Prepared {
            params: vec![ColumnDef::new("id", ValueKind::Int), ColumnDef::new("name", ValueKind::Text)],
            columns: Self::columns(),
        }))
    }

    fn execute(&mut self, request: ExecuteRequest) -> impl Future<Output = Result<Execution, BackendError>> + Send {
        tracing::debug!(statement = %request.statement, params = ?request.params, "execute");
        let max = request.params.first().and_then(Value::as_i64);
        let (Some(max), Some(Value::Text(exclude))) = (max, request.params.get(1)) else {
            return ready(Err(BackendError::new("22023", "expected an integer and a text parameter")));
        };
        let rows = self
            .users
            .iter()
            .filter(|row| row[0].as_i64().is_some_and(|id| id < max))
            .filter(|row| !matches!(&row[1], Value::Text(name) if name == exclude))
            .cloned()
            .collect::<Vec<_>>();
        ready(Ok(Execution::Rows(Box::new(VecSource::new(rows)))))
    }

    fn free(&mut self, statement: StatementId) {
        tracing::debug!(%statement, "free");
    }
}
