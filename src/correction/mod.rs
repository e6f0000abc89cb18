//! The validate-execute-repair loop.
//!
//! A request enters `Orchestrator::run`, which drives
//! GENERATE -> VALIDATE -> EXECUTE -> CRITIQUE -> (DONE | REPAIR) until the
//! candidate succeeds, a failure is judged terminal, or the attempt budget
//! runs out. Every run ends in a `CorrectionReport`.

mod critic;
mod executor;
mod orchestrator;
mod roles;
mod session;
mod state;

pub use critic::{error_from_datastore, error_from_sandbox, error_from_verdict, explain, Judgement};
pub use executor::{CandidateExecutor, Prepared};
pub use orchestrator::Orchestrator;
pub use roles::{Generator, Proposal, Repairer, ReviewVerdict, Reviewer};
pub use session::{AttemptRecord, CorrectionSession};
pub use state::{CorrectionState, StepRecord};

pub use crate::llm::CandidateKind;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::db::{QueryResult, Schema};
use crate::memory::ErrorKind;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Generated,
    Repaired,
}

/// One proposed SQL or analysis text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCandidate {
    pub text: String,
    pub origin: CandidateOrigin,
    pub attempt: u32,
    pub kind: CandidateKind,
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
    Timeout,
}

/// Result of executing one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    /// Result set of a SQL candidate.
    pub rows: Option<QueryResult>,
    /// `result` value of an analysis candidate.
    pub output: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub elapsed_ms: u64,
}

impl ExecutionOutcome {
    pub fn with_rows(rows: QueryResult, elapsed: Duration) -> Self {
        Self {
            status: OutcomeStatus::Success,
            rows: Some(rows),
            output: None,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn with_output(output: Option<Value>, elapsed: Duration) -> Self {
        Self {
            status: OutcomeStatus::Success,
            rows: None,
            output,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// A failed execution; timeout kinds get the `Timeout` status.
    pub fn failed(error: ErrorInfo, elapsed: Duration) -> Self {
        let status = if error.kind.is_timeout() {
            OutcomeStatus::Timeout
        } else {
            OutcomeStatus::Error
        };
        Self {
            status,
            rows: None,
            output: None,
            error: Some(error),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionConfig {
    /// Most candidates a session may produce.
    pub max_attempts: u32,
    /// Budget for the whole request.
    pub request_timeout: Duration,
    /// Memory records offered as hints per repair.
    pub hint_limit: usize,
    /// Ask the Reviewer role whether successful SQL answers the question.
    pub review_results: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(120),
            hint_limit: 3,
            review_results: false,
        }
    }
}

/// A natural-language question to answer.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub tenant_id: String,
    pub question: String,
    pub schema: Schema,
    /// Variables handed to analysis code.
    pub context: Map<String, Value>,
    /// Overrides the configured request timeout.
    pub deadline: Option<tokio::time::Instant>,
}

impl QueryRequest {
    pub fn new(tenant_id: impl Into<String>, question: impl Into<String>, schema: Schema) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            question: question.into(),
            schema,
            context: Map::new(),
            deadline: None,
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStatus {
    Done,
    Failed,
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// The terminal kind, e.g. `MAX_RETRIES_EXCEEDED`.
    pub kind: ErrorKind,
    pub message: String,
    /// Plain-language account of why the loop gave up.
    pub explanation: String,
    /// The last concrete candidate failure, if there was one.
    pub last_error: Option<ErrorInfo>,
}

/// Everything a session hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub session_id: Uuid,
    pub status: CorrectionStatus,
    /// Accepted SQL, when the final candidate was SQL.
    pub final_sql: Option<String>,
    /// Accepted analysis code, when the final candidate was analysis.
    pub analysis_code: Option<String>,
    pub rows: Option<QueryResult>,
    pub analysis_output: Option<Value>,
    /// Repair rounds performed; at most `max_attempts - 1`.
    pub correction_attempts: u32,
    /// The processing trace.
    pub steps: Vec<StepRecord>,
    pub history: Vec<AttemptRecord>,
    pub failure: Option<FailureSummary>,
    pub elapsed_ms: u64,
}

impl CorrectionReport {
    pub fn is_done(&self) -> bool {
        self.status == CorrectionStatus::Done
    }
}
