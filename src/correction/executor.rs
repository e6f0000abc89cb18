//! VALIDATE and EXECUTE for a single candidate.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::db::DatabaseClient;
use crate::memory::ErrorKind;
use crate::safety::{truncate_for_log, SqlValidator, VettedSql};
use crate::sandbox::{SandboxExecutor, SandboxLimits};

use super::critic::{error_from_datastore, error_from_sandbox, error_from_verdict};
use super::{CandidateKind, ErrorInfo, ExecutionOutcome, QueryCandidate};

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    Sql(VettedSql),
    Analysis(String),
}

/// Routes candidates to the datastore or the sandbox.
#[derive(Clone)]
pub struct CandidateExecutor {
    db: Arc<dyn DatabaseClient>,
    sandbox: SandboxExecutor,
    limits: SandboxLimits,
    validator: SqlValidator,
}

impl CandidateExecutor {
    pub fn new(db: Arc<dyn DatabaseClient>) -> Self {
        Self {
            db,
            sandbox: SandboxExecutor::default(),
            limits: SandboxLimits::default(),
            validator: SqlValidator::new(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: SandboxExecutor, limits: SandboxLimits) -> Self {
        self.sandbox = sandbox;
        self.limits = limits;
        self
    }

    pub fn dialect(&self) -> &'static str {
        self.db.dialect()
    }

    /// Validates a candidate. SQL goes through the safety validator, analysis
    /// code through the sandbox's static scan.
    pub fn prepare(&self, candidate: &QueryCandidate) -> Result<Prepared, ErrorInfo> {
        match candidate.kind {
            CandidateKind::Sql => self
                .validator
                .vet(&candidate.text)
                .map(Prepared::Sql)
                .map_err(|verdict| {
                    warn!(
                        attempt = candidate.attempt,
                        violation = %verdict.reason(),
                        sql = %truncate_for_log(&candidate.text),
                        "Validator rejected candidate"
                    );
                    error_from_verdict(&verdict)
                }),
            CandidateKind::Analysis => {
                let findings = self.sandbox.check(&candidate.text);
                if findings.is_empty() || !self.sandbox.rejects_on_findings() {
                    return Ok(Prepared::Analysis(candidate.text.clone()));
                }

                let rendered: Vec<String> = findings.iter().map(ToString::to_string).collect();
                warn!(
                    attempt = candidate.attempt,
                    findings = findings.len(),
                    "Static scan rejected analysis candidate"
                );
                // Same kind as a sandbox refusal at run time.
                Err(ErrorInfo::new(
                    ErrorKind::SandboxResourceExceeded,
                    format!("Analysis code rejected: {}", rendered.join("; ")),
                ))
            }
        }
    }

    /// Runs a prepared candidate. Never fails; failures are classified into
    /// the outcome.
    pub async fn execute(
        &self,
        prepared: &Prepared,
        context: &Map<String, Value>,
    ) -> ExecutionOutcome {
        let start = Instant::now();
        match prepared {
            Prepared::Sql(sql) => match self.db.execute_query(sql).await {
                Ok(rows) => {
                    debug!(rows = rows.row_count(), "Candidate executed");
                    ExecutionOutcome::with_rows(rows, start.elapsed())
                }
                Err(e) => {
                    debug!(error = %e, "Candidate failed at the datastore");
                    ExecutionOutcome::failed(error_from_datastore(&e), start.elapsed())
                }
            },
            Prepared::Analysis(code) => {
                let result = self.sandbox.execute(code, context, self.limits).await;
                if result.success {
                    ExecutionOutcome::with_output(result.output, start.elapsed())
                } else {
                    ExecutionOutcome::failed(error_from_sandbox(&result), start.elapsed())
                }
            }
        }
    }
}
