//! Per-request bookkeeping for the correction loop.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::db::QueryResult;

use super::{CorrectionState, ErrorInfo, QueryCandidate, StepRecord};

/// One candidate and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub candidate: QueryCandidate,
    /// None if the candidate succeeded.
    pub error: Option<ErrorInfo>,
}

/// State carried through one run of the loop.
///
/// Owned by a single task; sessions share nothing with each other.
#[derive(Debug)]
pub struct CorrectionSession {
    pub session_id: Uuid,
    pub tenant_id: String,
    pub question: String,
    /// 1-based number of the candidate in flight.
    pub attempt: u32,
    pub steps: Vec<StepRecord>,
    pub history: Vec<AttemptRecord>,
    /// Signature of the most recent failure.
    pub last_signature: Option<String>,
    /// Memory patterns recorded by this session, credited if it ends in DONE.
    pub recorded_hashes: BTreeSet<String>,
    /// Rows from the latest SQL candidate that executed cleanly.
    pub last_result: Option<QueryResult>,
    started: Instant,
}

impl CorrectionSession {
    pub fn new(tenant_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            question: question.into(),
            attempt: 1,
            steps: Vec::new(),
            history: Vec::new(),
            last_signature: None,
            recorded_hashes: BTreeSet::new(),
            last_result: None,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Appends a step to the trace.
    pub fn record_step(&mut self, state: CorrectionState, detail: impl Into<String>) {
        let detail = detail.into();
        info!(
            session_id = %self.session_id,
            tenant_id = %self.tenant_id,
            attempt = self.attempt,
            state = %state,
            "{detail}"
        );
        self.steps.push(StepRecord {
            attempt: self.attempt,
            state,
            detail,
            elapsed_ms: self.elapsed_ms(),
            at: Utc::now(),
        });
    }

    pub fn record_attempt(&mut self, candidate: QueryCandidate, error: Option<ErrorInfo>) {
        self.history.push(AttemptRecord { candidate, error });
    }

    /// The most recent failed attempt.
    pub fn last_failure(&self) -> Option<&AttemptRecord> {
        self.history.iter().rev().find(|a| a.error.is_some())
    }

    /// Variables handed to analysis code: the caller's context, plus `rows`
    /// and `columns` once a SQL candidate has produced a result.
    pub fn analysis_context(&self, base: &Map<String, Value>) -> Map<String, Value> {
        let mut context = base.clone();
        if let Some(result) = &self.last_result {
            context.insert("rows".to_string(), result.rows_as_json());
            context.insert(
                "columns".to_string(),
                Value::Array(result.column_names().into_iter().map(Value::String).collect()),
            );
        }
        context
    }

    /// Repair rounds performed so far.
    pub fn repairs(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}
