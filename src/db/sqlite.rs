//! SQLite datastore client.

use crate::db::{
    ClientOptions, Column, ColumnInfo, DatabaseClient, ForeignKey, QueryResult, Row, Schema,
    Table, Value,
};
use crate::error::{MendError, Result};
use crate::safety::VettedSql;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::warn;

/// SQLite client backed by a sqlx pool.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
    options: ClientOptions,
}

impl SqliteClient {
    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool, options: ClientOptions) -> Self {
        Self { pool, options }
    }

    /// Opens the database named by a `sqlite:` URL.
    ///
    /// `sqlite::memory:` databases use a single connection so every query
    /// sees the same data.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MendError::connection(format!("Invalid SQLite URL: {e}")))?
            .busy_timeout(Duration::from_secs(5));

        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await
            .map_err(|e| MendError::connection(format!("Failed to open SQLite database: {e}")))?;

        Ok(Self { pool, options })
    }

    /// Returns the underlying pool, for seeding fixtures.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_table_names(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MendError::query(format!("Failed to fetch tables: {e}")))
    }

    async fn fetch_table(&self, name: &str) -> Result<(Table, Vec<ForeignKey>)> {
        // name, type, notnull, dflt_value, pk
        let columns: Vec<(String, String, bool, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MendError::query(format!("Failed to fetch columns for {name}: {e}")))?;

        let mut pk: Vec<(i64, String)> = columns
            .iter()
            .filter(|c| c.4 > 0)
            .map(|c| (c.4, c.0.clone()))
            .collect();
        pk.sort();

        let table = Table {
            name: name.to_string(),
            columns: columns
                .into_iter()
                .map(|(col, data_type, not_null, default, _)| Column {
                    name: col,
                    data_type,
                    is_nullable: !not_null,
                    default,
                })
                .collect(),
            primary_key: pk.into_iter().map(|(_, col)| col).collect(),
        };

        // id, table, from, to
        let fk_rows: Vec<(i64, String, String, Option<String>)> = sqlx::query_as(
            "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MendError::query(format!("Failed to fetch foreign keys for {name}: {e}")))?;

        let mut foreign_keys: Vec<(i64, ForeignKey)> = Vec::new();
        for (id, to_table, from_column, to_column) in fk_rows {
            let to_column = to_column.unwrap_or_else(|| "rowid".to_string());
            match foreign_keys.iter_mut().find(|(fk_id, _)| *fk_id == id) {
                Some((_, fk)) => {
                    fk.from_columns.push(from_column);
                    fk.to_columns.push(to_column);
                }
                None => foreign_keys.push((
                    id,
                    ForeignKey::new(name, vec![from_column], to_table, vec![to_column]),
                )),
            }
        }

        Ok((table, foreign_keys.into_iter().map(|(_, fk)| fk).collect()))
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    fn dialect(&self) -> &'static str {
        "SQLite"
    }

    async fn introspect_schema(&self) -> Result<Schema> {
        let mut schema = Schema::new();
        for name in self.fetch_table_names().await? {
            let (table, foreign_keys) = self.fetch_table(&name).await?;
            schema.tables.push(table);
            schema.foreign_keys.extend(foreign_keys);
        }
        Ok(schema)
    }

    async fn execute_query(&self, sql: &VettedSql) -> Result<QueryResult> {
        let start = Instant::now();
        let timeout = self.options.query_timeout;

        let rows = tokio::time::timeout(timeout, sqlx::query(sql.as_str()).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                MendError::timeout(format!(
                    "Query timed out after {} seconds",
                    timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| match e.as_database_error() {
                Some(db_error) => MendError::query(db_error.message().to_string()),
                None => MendError::connection(e.to_string()),
            })?;

        let columns: Vec<ColumnInfo> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect()
            })
            .unwrap_or_default();

        let total_rows = rows.len();
        if total_rows > self.options.max_rows {
            warn!(
                "Query returned {} rows, truncating to {} rows",
                total_rows, self.options.max_rows
            );
        }

        let converted: Vec<Row> = rows
            .iter()
            .take(self.options.max_rows)
            .map(convert_row)
            .collect();

        Ok(QueryResult::capped(
            columns,
            converted,
            total_rows,
            start.elapsed(),
        ))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn convert_row(row: &SqliteRow) -> Row {
    (0..row.columns().len())
        .map(|i| convert_value(row, i))
        .collect()
}

/// SQLite is dynamically typed, so the decode follows the stored value's type.
fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" => row.try_get::<i64, _>(index).map(Value::Int),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "REAL" | "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(index).map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::String),
    }
    .unwrap_or(Value::Null)
}
