//! SQLite-backed error memory.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{migrations, ErrorKind, ErrorMemoryRecord, ErrorMemoryStore, FailureReport};
use crate::error::{MendError, Result};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;
const MAX_STORED_MESSAGE_CHARS: usize = 1000;

const RECORD_COLUMNS: &str = "tenant_id, pattern_hash, error_kind, error_message, table_name, \
     original_query, fixed_query, occurrence_count, success_count, first_seen, last_seen";

const RANK_ORDER: &str = "ORDER BY (fixed_query IS NOT NULL) DESC, success_count DESC, \
     occurrence_count DESC, last_seen DESC";

#[derive(Debug, Clone, FromRow)]
struct ErrorMemoryRow {
    tenant_id: String,
    pattern_hash: String,
    error_kind: String,
    error_message: String,
    table_name: String,
    original_query: String,
    fixed_query: Option<String>,
    occurrence_count: i64,
    success_count: i64,
    first_seen: String,
    last_seen: String,
}

impl From<ErrorMemoryRow> for ErrorMemoryRecord {
    fn from(row: ErrorMemoryRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            pattern_hash: row.pattern_hash,
            error_kind: ErrorKind::parse(&row.error_kind),
            error_message: row.error_message,
            table_name: row.table_name,
            original_query: row.original_query,
            fixed_query: row.fixed_query,
            occurrence_count: row.occurrence_count,
            success_count: row.success_count,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        }
    }
}

/// Error memory stored in a local SQLite database.
pub struct SqliteErrorMemory {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteErrorMemory {
    /// Opens or creates the store at the default platform path.
    ///
    /// - Linux: `~/.local/share/sqlmend/memory.db`
    /// - macOS: `~/Library/Application Support/sqlmend/memory.db`
    pub async fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open(&path).await
    }

    /// Returns the default store path for the current platform.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| MendError::persistence("Could not determine data directory"))?;
        Ok(data_dir.join("sqlmend").join("memory.db"))
    }

    /// Opens or creates the store at the given path.
    ///
    /// Retries with backoff when the file is locked by another process.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MendError::persistence(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut last_error = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt)))
                    .await;
            }

            match Self::connect(path).await {
                Ok(pool) => {
                    migrations::run_migrations(&pool).await?;
                    info!("Error memory opened at {}", path.display());
                    return Ok(Self {
                        pool,
                        path: Some(path.to_path_buf()),
                    });
                }
                Err(e) => {
                    warn!(attempt, "Failed to open error memory: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MendError::persistence("Failed to open error memory after retries")))
    }

    /// Opens a private in-memory store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| MendError::persistence(format!("Failed to open in-memory store: {e}")))?;
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool, path: None })
    }

    async fn connect(path: &Path) -> Result<SqlitePool> {
        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| MendError::persistence(format!("Invalid database path: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| MendError::persistence(format!("Failed to connect to error memory: {e}")))
    }

    /// Returns the on-disk path, if the store is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl ErrorMemoryStore for SqliteErrorMemory {
    async fn record_failure(&self, report: &FailureReport) -> Result<ErrorMemoryRecord> {
        let signature = report.signature();
        let timestamp = now();

        let query = format!(
            r#"
            INSERT INTO error_memory
                (tenant_id, pattern_hash, error_kind, error_message, table_name,
                 original_query, first_seen, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, pattern_hash) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                error_message = excluded.error_message,
                original_query = excluded.original_query,
                last_seen = excluded.last_seen
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row: ErrorMemoryRow = sqlx::query_as(&query)
            .bind(&report.tenant_id)
            .bind(&signature.pattern_hash)
            .bind(signature.kind.as_str())
            .bind(truncate_chars(&report.error_message, MAX_STORED_MESSAGE_CHARS))
            .bind(&signature.table_context)
            .bind(&report.original_query)
            .bind(&timestamp)
            .bind(&timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MendError::persistence(format!("Failed to record failure: {e}")))?;

        debug!(
            tenant = %report.tenant_id,
            pattern = %signature.pattern_hash,
            occurrences = row.occurrence_count,
            "Recorded failure pattern"
        );

        Ok(row.into())
    }

    async fn record_fix_success(
        &self,
        tenant_id: &str,
        pattern_hash: &str,
        fixed_query: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE error_memory
            SET success_count = success_count + 1,
                fixed_query = ?,
                last_seen = ?
            WHERE tenant_id = ? AND pattern_hash = ?
            "#,
        )
        .bind(fixed_query)
        .bind(now())
        .bind(tenant_id)
        .bind(pattern_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| MendError::persistence(format!("Failed to record fix: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn lookup_similar(
        &self,
        tenant_id: &str,
        table_context: &[String],
        limit: usize,
    ) -> Result<Vec<ErrorMemoryRecord>> {
        let tables: Vec<String> = table_context
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if tables.is_empty() {
            return self.top_patterns(tenant_id, limit).await;
        }

        let table_filter = tables
            .iter()
            .map(|_| "instr(',' || table_name || ',', ?) > 0")
            .collect::<Vec<_>>()
            .join(" OR ");

        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM error_memory \
             WHERE tenant_id = ? AND ({table_filter}) {RANK_ORDER} LIMIT ?"
        );

        let mut sqlx_query = sqlx::query_as::<_, ErrorMemoryRow>(&query).bind(tenant_id);
        for table in &tables {
            sqlx_query = sqlx_query.bind(format!(",{table},"));
        }
        let rows = sqlx_query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MendError::persistence(format!("Failed to look up patterns: {e}")))?;

        Ok(rows.into_iter().map(ErrorMemoryRecord::from).collect())
    }

    async fn get(&self, tenant_id: &str, pattern_hash: &str) -> Result<Option<ErrorMemoryRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM error_memory WHERE tenant_id = ? AND pattern_hash = ?"
        );
        let row: Option<ErrorMemoryRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(pattern_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MendError::persistence(format!("Failed to get pattern: {e}")))?;

        Ok(row.map(ErrorMemoryRecord::from))
    }

    async fn top_patterns(&self, tenant_id: &str, limit: usize) -> Result<Vec<ErrorMemoryRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM error_memory WHERE tenant_id = ? {RANK_ORDER} LIMIT ?"
        );
        let rows: Vec<ErrorMemoryRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MendError::persistence(format!("Failed to list patterns: {e}")))?;

        Ok(rows.into_iter().map(ErrorMemoryRecord::from).collect())
    }
}
