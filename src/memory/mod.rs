//! Error memory: persisted failure patterns and their known fixes.
//!
//! Failures are keyed per tenant by a normalized signature, so the same
//! mistake made twice bumps one record instead of creating two. Records that
//! touch the tables of a new failure are fed back to the Repair role as
//! few-shot hints.

mod classify;
mod migrations;
mod signature;
mod sqlite;

pub use classify::{classify_error, ErrorKind};
pub use signature::{normalize_message, normalize_tables, ErrorSignature};
pub use sqlite::SqliteErrorMemory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A persisted failure pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMemoryRecord {
    pub tenant_id: String,
    pub pattern_hash: String,
    pub error_kind: ErrorKind,
    /// Most recent raw message for this pattern.
    pub error_message: String,
    /// Comma-joined table context.
    pub table_name: String,
    /// Most recent failing query for this pattern.
    pub original_query: String,
    pub fixed_query: Option<String>,
    pub occurrence_count: i64,
    pub success_count: i64,
    pub first_seen: String,
    pub last_seen: String,
}

impl ErrorMemoryRecord {
    /// Returns the table names this record touches.
    pub fn tables(&self) -> Vec<&str> {
        self.table_name
            .split(',')
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Returns true if a fix for this pattern has been recorded.
    pub fn has_fix(&self) -> bool {
        self.fixed_query.is_some()
    }
}

/// A failure to be recorded.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub tenant_id: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub original_query: String,
    pub table_context: Vec<String>,
}

impl FailureReport {
    /// Computes the signature this failure is keyed by.
    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::compute(self.error_kind, &self.error_message, &self.table_context)
    }
}

/// Storage for error patterns.
///
/// Implementations must make `record_failure` an atomic upsert per
/// `(tenant_id, pattern_hash)`; sessions call it concurrently.
#[async_trait]
pub trait ErrorMemoryStore: Send + Sync {
    /// Inserts the pattern or increments its `occurrence_count`.
    async fn record_failure(&self, report: &FailureReport) -> Result<ErrorMemoryRecord>;

    /// Increments `success_count` and stores the fix.
    ///
    /// Returns false if no such pattern exists for the tenant.
    async fn record_fix_success(
        &self,
        tenant_id: &str,
        pattern_hash: &str,
        fixed_query: &str,
    ) -> Result<bool>;

    /// Returns the tenant's records that touch any of the given tables.
    ///
    /// Records with a known fix come first, then by `success_count`,
    /// `occurrence_count` and recency. An empty table context returns the
    /// tenant's top patterns.
    async fn lookup_similar(
        &self,
        tenant_id: &str,
        table_context: &[String],
        limit: usize,
    ) -> Result<Vec<ErrorMemoryRecord>>;

    /// Fetches a single record.
    async fn get(&self, tenant_id: &str, pattern_hash: &str) -> Result<Option<ErrorMemoryRecord>>;

    /// Returns the tenant's records in ranking order.
    async fn top_patterns(&self, tenant_id: &str, limit: usize) -> Result<Vec<ErrorMemoryRecord>>;
}
