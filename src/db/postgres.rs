//! PostgreSQL datastore client.

use crate::config::redact_url;
use crate::db::{
    ClientOptions, Column, ColumnInfo, DatabaseClient, ForeignKey, QueryResult, Row, Schema,
    Table, Value,
};
use crate::error::{MendError, Result};
use crate::safety::VettedSql;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Postgres, Row as SqlxRow, TypeInfo};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL client backed by a sqlx pool.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
    options: ClientOptions,
}

impl PostgresClient {
    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool, options: ClientOptions) -> Self {
        Self { pool, options }
    }

    /// Connects, retrying transient failures with exponential backoff.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self> {
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => return Ok(Self { pool, options }),
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(map_connection_error(&e, url)),
            }
        }
    }

    /// Loads every table of the `public` schema with its columns and
    /// primary key in one catalog round trip.
    async fn fetch_tables(&self) -> Result<Vec<Table>> {
        let rows: Vec<(String, String, String, bool, Option<String>, Option<i32>)> =
            sqlx::query_as(
                r#"
                SELECT
                    c.relname::text,
                    a.attname::text,
                    format_type(a.atttypid, a.atttypmod),
                    NOT a.attnotnull,
                    pg_get_expr(d.adbin, d.adrelid),
                    array_position(pk.conkey, a.attnum)::int4
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
                LEFT JOIN pg_catalog.pg_attrdef d
                    ON d.adrelid = c.oid AND d.adnum = a.attnum
                LEFT JOIN pg_catalog.pg_constraint pk
                    ON pk.conrelid = c.oid AND pk.contype = 'p'
                WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p')
                ORDER BY c.relname, a.attnum
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MendError::query(format!("Failed to read table catalog: {e}")))?;

        let mut tables: Vec<Table> = Vec::new();
        let mut key_positions: Vec<Vec<(i32, String)>> = Vec::new();
        for (table, name, data_type, is_nullable, default, key_position) in rows {
            if tables.last().map(|t| t.name.as_str()) != Some(table.as_str()) {
                tables.push(Table::new(table));
                key_positions.push(Vec::new());
            }
            if let (Some(position), Some(keys)) = (key_position, key_positions.last_mut()) {
                keys.push((position, name.clone()));
            }
            if let Some(current) = tables.last_mut() {
                current.columns.push(Column {
                    name,
                    data_type,
                    is_nullable,
                    default,
                });
            }
        }

        for (table, mut keys) in tables.iter_mut().zip(key_positions) {
            keys.sort_unstable();
            table.primary_key = keys.into_iter().map(|(_, name)| name).collect();
        }
        Ok(tables)
    }

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                con.conname::text,
                src.relname::text,
                sa.attname::text,
                dst.relname::text,
                da.attname::text
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class src ON src.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = src.relnamespace
            JOIN pg_catalog.pg_class dst ON dst.oid = con.confrelid
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                WITH ORDINALITY AS k(src_attnum, dst_attnum, position)
            JOIN pg_catalog.pg_attribute sa
                ON sa.attrelid = con.conrelid AND sa.attnum = k.src_attnum
            JOIN pg_catalog.pg_attribute da
                ON da.attrelid = con.confrelid AND da.attnum = k.dst_attnum
            WHERE con.contype = 'f' AND n.nspname = 'public'
            ORDER BY src.relname, con.conname, k.position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MendError::query(format!("Failed to read foreign keys: {e}")))?;

        // Constraint names are only unique per table.
        let mut by_constraint: BTreeMap<(String, String), ForeignKey> = BTreeMap::new();
        for (constraint, from_table, from_column, to_table, to_column) in rows {
            let key = by_constraint
                .entry((from_table.clone(), constraint))
                .or_insert_with(|| ForeignKey::new(from_table, Vec::new(), to_table, Vec::new()));
            key.from_columns.push(from_column);
            key.to_columns.push(to_column);
        }

        Ok(by_constraint.into_values().collect())
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn dialect(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn introspect_schema(&self) -> Result<Schema> {
        Ok(Schema {
            tables: self.fetch_tables().await?,
            foreign_keys: self.fetch_foreign_keys().await?,
        })
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
            .map_err(map_query_error)?;

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

        let result = QueryResult::capped(columns, converted, total_rows, start.elapsed());
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|column| convert_value(row, column.ordinal(), column.type_info().name()))
        .collect()
}

fn decode<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Decodes one cell. Types without a mapping, and cells that fail to
/// decode, come back as `Null`.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value = match type_name.to_uppercase().as_str() {
        "BOOL" => decode::<bool>(row, index).map(Value::Bool),
        "INT2" => decode::<i16>(row, index).map(|v| Value::Int(v.into())),
        "INT4" => decode::<i32>(row, index).map(|v| Value::Int(v.into())),
        "INT8" => decode::<i64>(row, index).map(Value::Int),
        "FLOAT4" => decode::<f32>(row, index).map(|v| Value::Float(v.into())),
        "FLOAT8" => decode::<f64>(row, index).map(Value::Float),
        "BYTEA" => decode::<Vec<u8>>(row, index).map(Value::Bytes),
        "DATE" => decode::<NaiveDate>(row, index).map(|d| Value::String(d.to_string())),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, index).map(|t| Value::String(t.to_string())),
        "TIMESTAMPTZ" => {
            decode::<DateTime<Utc>>(row, index).map(|t| Value::String(t.to_rfc3339()))
        }
        _ => decode::<String>(row, index).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();
    ["connection refused", "timed out", "temporarily unavailable", "connection reset", "broken pipe"]
        .iter()
        .any(|needle| error_str.contains(needle))
}

fn map_connection_error(error: &sqlx::Error, url: &str) -> MendError {
    let target = redact_url(url);
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        MendError::connection(format!(
            "Cannot connect to {target}. Check that the server is running."
        ))
    } else if error_str.contains("authentication failed") {
        MendError::connection(format!("Authentication failed for {target}."))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        MendError::connection(format!("Database in {target} does not exist."))
    } else if error_str.contains("timed out") {
        MendError::connection(format!("Connection to {target} timed out."))
    } else {
        MendError::connection(error.to_string())
    }
}

/// Maps an execution failure, keeping the datastore's message for classification.
fn map_query_error(error: sqlx::Error) -> MendError {
    let Some(db_error) = error.as_database_error() else {
        return match error {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                MendError::connection(error.to_string())
            }
            _ => MendError::query(error.to_string()),
        };
    };

    let mut message = format!("ERROR: {}", db_error.message());
    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            message.push_str("\nDETAIL: ");
            message.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            message.push_str("\nHINT: ");
            message.push_str(hint);
        }
        // 57014: query_canceled (statement_timeout)
        if pg_error.code() == "57014" {
            return MendError::timeout(message);
        }
    }
    MendError::query(message)
}
