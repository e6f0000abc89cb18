//! Schema versioning and migrations for the error memory database.
//!
//! Forward-only; each version runs once and is recorded in `schema_versions`.

use crate::error::{MendError, Result};
use sqlx::sqlite::SqlitePool;
use tracing::info;

const CURRENT_VERSION: i32 = 2;

/// Runs all pending migrations on the database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    ensure_schema_versions_table(pool).await?;

    let current = get_current_version(pool).await?;

    if current > CURRENT_VERSION {
        return Err(MendError::persistence(format!(
            "Error memory schema version ({}) is newer than supported version ({}). \
             Please upgrade sqlmend.",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        info!(
            "Migrating error memory from version {} to {}",
            current, CURRENT_VERSION
        );
        for version in (current + 1)..=CURRENT_VERSION {
            run_migration(pool, version).await?;
            record_version(pool, version).await?;
            info!("Applied migration v{}", version);
        }
    }

    Ok(())
}

async fn ensure_schema_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| MendError::persistence(format!("Failed to create schema_versions table: {e}")))?;

    Ok(())
}

async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| MendError::persistence(format!("Failed to get schema version: {e}")))?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

async fn record_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| MendError::persistence(format!("Failed to record migration: {e}")))?;
    Ok(())
}

async fn run_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        2 => migration_v2(pool).await,
        _ => Err(MendError::persistence(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the error memory table, unique per tenant and pattern.
async fn migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            pattern_hash TEXT NOT NULL,
            error_kind TEXT NOT NULL,
            error_message TEXT NOT NULL,
            table_name TEXT NOT NULL DEFAULT '',
            original_query TEXT NOT NULL,
            fixed_query TEXT,
            occurrence_count INTEGER NOT NULL DEFAULT 1,
            success_count INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            UNIQUE (tenant_id, pattern_hash)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| MendError::persistence(format!("Failed to create error_memory table: {e}")))?;

    Ok(())
}

/// Migration v2: index for per-tenant ranking queries.
async fn migration_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_error_memory_tenant_rank
        ON error_memory (tenant_id, success_count DESC, occurrence_count DESC, last_seen DESC)
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| MendError::persistence(format!("Failed to create ranking index: {e}")))?;

    Ok(())
}
