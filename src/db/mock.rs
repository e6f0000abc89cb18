//! Mock database client for testing.
//!
//! Scripted responses are matched by substring against the executed SQL, in
//! the order they were added. Every executed statement is recorded.

use super::{ColumnInfo, DatabaseClient, QueryResult, Row, Schema};
use crate::error::{MendError, Result};
use crate::safety::VettedSql;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// A failure the mock reports instead of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Datastore rejected the query with this message.
    Query(String),
    /// The query exceeded its budget.
    Timeout(String),
    /// The connection dropped.
    Connection(String),
}

impl MockFailure {
    fn to_error(&self) -> MendError {
        match self {
            Self::Query(msg) => MendError::query(msg.clone()),
            Self::Timeout(msg) => MendError::timeout(msg.clone()),
            Self::Connection(msg) => MendError::connection(msg.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Result(QueryResult),
    Failure(MockFailure),
}

/// A mock database client that returns scripted results.
#[derive(Debug, Default)]
pub struct MockDatabaseClient {
    schema: Schema,
    responses: Vec<(String, Scripted)>,
    executed: Mutex<Vec<String>>,
}

impl MockDatabaseClient {
    /// Creates a mock with an empty schema and no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock with the given schema.
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Returns `columns`/`rows` for SQL containing `pattern`.
    pub fn on_query(
        mut self,
        pattern: impl Into<String>,
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
    ) -> Self {
        let result =
            QueryResult::with_data(columns, rows).with_execution_time(Duration::from_millis(1));
        self.responses
            .push((pattern.into(), Scripted::Result(result)));
        self
    }

    /// Fails SQL containing `pattern`.
    pub fn on_failure(mut self, pattern: impl Into<String>, failure: MockFailure) -> Self {
        self.responses
            .push((pattern.into(), Scripted::Failure(failure)));
        self
    }

    /// SQL statements executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn dialect(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn introspect_schema(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    async fn execute_query(&self, sql: &VettedSql) -> Result<QueryResult> {
        let sql = sql.as_str();
        self.executed
            .lock()
            .map_err(|_| MendError::internal("mock execution log poisoned"))?
            .push(sql.to_string());

        let scripted = self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, scripted)| scripted);

        match scripted {
            Some(Scripted::Result(result)) => Ok(result.clone()),
            Some(Scripted::Failure(failure)) => Err(failure.to_error()),
            None => Ok(QueryResult::default().with_execution_time(Duration::from_millis(1))),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
