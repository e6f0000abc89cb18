//! The correction state machine.
//!
//! `Orchestrator::run` owns one `CorrectionSession` and steps a `Phase` value
//! until it reaches `Done` or `Failed`. Each phase handler returns the next
//! phase; the attempt bound is checked in exactly one place, the REPAIR
//! handler. Every await on the LLM, the datastore, the sandbox or the memory
//! store races the request deadline and the cancellation token.

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::DatabaseClient;
use crate::llm::{LlmClient, RepairContext};
use crate::memory::{ErrorKind, ErrorMemoryRecord, ErrorMemoryStore, ErrorSignature, FailureReport};
use crate::safety::table_references;
use crate::sandbox::{SandboxExecutor, SandboxLimits};

use super::critic::{explain, judge, Judgement};
use super::executor::{CandidateExecutor, Prepared};
use super::roles::{Generator, Proposal, Repairer, ReviewVerdict, Reviewer};
use super::session::CorrectionSession;
use super::{
    CandidateKind, CandidateOrigin, CorrectionConfig, CorrectionReport, CorrectionState,
    CorrectionStatus, ErrorInfo, ExecutionOutcome, FailureSummary, QueryCandidate, QueryRequest,
};

/// A candidate that failed, on its way to REPAIR.
#[derive(Debug, Clone)]
struct Failure {
    candidate: QueryCandidate,
    error: ErrorInfo,
    tables: Vec<String>,
}

impl Failure {
    fn new(candidate: QueryCandidate, error: ErrorInfo) -> Self {
        let tables = match candidate.kind {
            CandidateKind::Sql => table_references(&candidate.text),
            CandidateKind::Analysis => Vec::new(),
        };
        Self {
            candidate,
            error,
            tables,
        }
    }

    fn signature(&self) -> String {
        ErrorSignature::compute(self.error.kind, &self.error.message, &self.tables).pattern_hash
    }
}

/// What GENERATE needs on attempts after the first.
#[derive(Debug)]
struct RepairPlan {
    failure: Failure,
    hints: Vec<ErrorMemoryRecord>,
}

/// Why the loop stopped without an answer.
#[derive(Debug)]
struct Terminal {
    kind: ErrorKind,
    message: String,
    last_error: Option<ErrorInfo>,
    repeated: bool,
}

impl Terminal {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            last_error: None,
            repeated: false,
        }
    }

    fn after(mut self, error: Option<ErrorInfo>) -> Self {
        self.last_error = error;
        self
    }
}

#[derive(Debug)]
enum Phase {
    Generate(Option<RepairPlan>),
    Validate(QueryCandidate),
    Execute(QueryCandidate, Prepared),
    Critique(QueryCandidate, ExecutionOutcome),
    Repair(Failure),
    Done(QueryCandidate, ExecutionOutcome),
    Failed(Terminal),
}

/// Races a suspending step against cancellation and the request deadline.
async fn guarded<T>(
    fut: impl Future<Output = T>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T, Terminal> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(Terminal::new(ErrorKind::Cancelled, "Request cancelled")),
        _ = tokio::time::sleep_until(deadline) => {
            Err(Terminal::new(ErrorKind::RequestTimeout, "Request deadline exceeded"))
        }
        out = fut => Ok(out),
    }
}

/// Drives questions through generate, validate, execute and repair.
#[derive(Clone)]
pub struct Orchestrator {
    generator: Generator,
    repairer: Repairer,
    reviewer: Reviewer,
    executor: CandidateExecutor,
    memory: Option<Arc<dyn ErrorMemoryStore>>,
    config: CorrectionConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        db: Arc<dyn DatabaseClient>,
        config: CorrectionConfig,
    ) -> Self {
        Self {
            generator: Generator::new(llm.clone()),
            repairer: Repairer::new(llm.clone()),
            reviewer: Reviewer::new(llm),
            executor: CandidateExecutor::new(db),
            memory: None,
            config,
        }
    }

    /// Attaches an error memory; without one, repairs get no hints.
    pub fn with_memory(mut self, memory: Arc<dyn ErrorMemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxExecutor, limits: SandboxLimits) -> Self {
        self.executor = self.executor.with_sandbox(sandbox, limits);
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Answers one request.
    pub async fn run(&self, request: QueryRequest) -> CorrectionReport {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Answers one request, stopping early if `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> CorrectionReport {
        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.request_timeout);
        let mut run = Run {
            orchestrator: self,
            session: CorrectionSession::new(request.tenant_id.clone(), request.question.clone()),
            context_names: request.context.keys().cloned().collect(),
            request: &request,
            deadline,
            cancel: &cancel,
        };

        info!(
            session_id = %run.session.session_id,
            tenant_id = %request.tenant_id,
            max_attempts = self.max_attempts(),
            "Correction session started"
        );

        let mut phase = Phase::Generate(None);
        loop {
            phase = match phase {
                Phase::Generate(plan) => run.generate(plan).await,
                Phase::Validate(candidate) => run.validate(candidate).await,
                Phase::Execute(candidate, prepared) => run.execute(candidate, prepared).await,
                Phase::Critique(candidate, outcome) => run.critique(candidate, outcome).await,
                Phase::Repair(failure) => run.repair(failure).await,
                Phase::Done(candidate, outcome) => return run.done(candidate, outcome).await,
                Phase::Failed(terminal) => return run.failed(terminal),
            };
        }
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }
}

/// One request in flight.
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    session: CorrectionSession,
    request: &'a QueryRequest,
    context_names: Vec<String>,
    deadline: Instant,
    cancel: &'a CancellationToken,
}

impl Run<'_> {
    async fn generate(&mut self, plan: Option<RepairPlan>) -> Phase {
        let orch = self.orchestrator;
        let dialect = orch.executor.dialect();
        let schema = &self.request.schema;

        let (origin, proposal) = match &plan {
            None => {
                self.session
                    .record_step(CorrectionState::Generate, "Generating a first candidate");
                let fut = orch.generator.propose(
                    schema,
                    dialect,
                    &self.context_names,
                    &self.request.question,
                );
                (
                    CandidateOrigin::Generated,
                    guarded(fut, self.deadline, self.cancel).await,
                )
            }
            Some(plan) => {
                self.session.record_step(
                    CorrectionState::Generate,
                    format!(
                        "Repairing after {} with {} hint(s)",
                        plan.failure.error.kind,
                        plan.hints.len()
                    ),
                );
                let context = RepairContext {
                    question: &self.request.question,
                    failed_code: &plan.failure.candidate.text,
                    failed_kind: plan.failure.candidate.kind,
                    error_kind: plan.failure.error.kind,
                    error_message: &plan.failure.error.message,
                };
                let fut = orch.repairer.repair(
                    schema,
                    dialect,
                    &self.context_names,
                    &context,
                    &plan.hints,
                );
                (
                    CandidateOrigin::Repaired,
                    guarded(fut, self.deadline, self.cancel).await,
                )
            }
        };

        let last_error = plan.map(|p| p.failure.error);
        match proposal {
            Err(terminal) => Phase::Failed(terminal.after(last_error)),
            Ok(Err(e)) => {
                warn!(error = %e, "LLM call failed");
                Phase::Failed(Terminal::new(ErrorKind::LlmError, e.to_string()).after(last_error))
            }
            Ok(Ok(Proposal::Candidate(kind, text))) => Phase::Validate(QueryCandidate {
                text,
                origin,
                attempt: self.session.attempt,
                kind,
            }),
            Ok(Ok(Proposal::NoCandidate(reply))) => {
                let candidate = QueryCandidate {
                    text: reply,
                    origin,
                    attempt: self.session.attempt,
                    kind: CandidateKind::Sql,
                };
                let error = ErrorInfo::new(
                    ErrorKind::NoCandidate,
                    "The reply did not contain a SQL or Python code block",
                );
                self.session.record_attempt(candidate.clone(), Some(error.clone()));
                Phase::Repair(Failure {
                    candidate,
                    error,
                    tables: Vec::new(),
                })
            }
        }
    }

    async fn validate(&mut self, candidate: QueryCandidate) -> Phase {
        match self.orchestrator.executor.prepare(&candidate) {
            Ok(prepared) => {
                self.session.record_step(
                    CorrectionState::Validate,
                    format!("{} candidate passed validation", candidate.kind.as_str()),
                );
                Phase::Execute(candidate, prepared)
            }
            Err(error) => {
                self.session.record_step(
                    CorrectionState::Validate,
                    format!("Rejected: {}", error.message),
                );
                self.session
                    .record_attempt(candidate.clone(), Some(error.clone()));
                let failure = Failure::new(candidate, error);
                match failure.candidate.kind {
                    CandidateKind::Sql => Phase::Repair(failure),
                    // A scan rejection is a sandbox failure and gets the same repeat check.
                    CandidateKind::Analysis => {
                        self.triage(CorrectionState::Validate, failure).await
                    }
                }
            }
        }
    }

    async fn execute(&mut self, candidate: QueryCandidate, prepared: Prepared) -> Phase {
        self.session.record_step(
            CorrectionState::Execute,
            format!("Executing {} candidate", candidate.kind.as_str()),
        );
        let context = match candidate.kind {
            CandidateKind::Sql => self.request.context.clone(),
            CandidateKind::Analysis => self.session.analysis_context(&self.request.context),
        };
        let fut = self.orchestrator.executor.execute(&prepared, &context);
        match guarded(fut, self.deadline, self.cancel).await {
            Ok(outcome) => Phase::Critique(candidate, outcome),
            Err(terminal) => Phase::Failed(terminal),
        }
    }

    async fn critique(&mut self, candidate: QueryCandidate, outcome: ExecutionOutcome) -> Phase {
        if let (None, Some(rows)) = (&outcome.error, &outcome.rows) {
            self.session.last_result = Some(rows.clone());
        }
        let error = match &outcome.error {
            None => match self.review(&candidate, &outcome).await {
                Ok(None) => {
                    self.session.record_step(
                        CorrectionState::Critique,
                        format!("Execution succeeded in {} ms", outcome.elapsed_ms),
                    );
                    self.session.record_attempt(candidate.clone(), None);
                    return Phase::Done(candidate, outcome);
                }
                Ok(Some(rejection)) => rejection,
                Err(terminal) => return Phase::Failed(terminal),
            },
            Some(error) => error.clone(),
        };

        self.session
            .record_attempt(candidate.clone(), Some(error.clone()));
        self.triage(CorrectionState::Critique, Failure::new(candidate, error))
            .await
    }

    /// Routes a failure to REPAIR unless it is fatal or repeats the previous one.
    async fn triage(&mut self, state: CorrectionState, failure: Failure) -> Phase {
        let signature = failure.signature();

        match judge(
            &failure.error,
            &signature,
            self.session.last_signature.as_deref(),
        ) {
            Judgement::Retry => {
                self.session.record_step(
                    state,
                    format!("{}: {}", failure.error.kind, failure.error.message),
                );
                Phase::Repair(failure)
            }
            Judgement::Fatal => {
                self.session
                    .record_step(state, format!("{} is not retryable", failure.error.kind));
                let terminal = Terminal::new(failure.error.kind, failure.error.message.clone());
                Phase::Failed(terminal.after(Some(failure.error)))
            }
            Judgement::Repeated => {
                self.session
                    .record_step(state, format!("{} repeated after repair", failure.error.kind));
                // Still counts as an occurrence of the pattern.
                self.remember(&failure).await;
                let mut terminal =
                    Terminal::new(failure.error.kind, failure.error.message.clone());
                terminal.repeated = true;
                Phase::Failed(terminal.after(Some(failure.error)))
            }
        }
    }

    /// Asks the Reviewer about a successful SQL result, if enabled.
    ///
    /// Returns the mismatch as a failure when the Reviewer rejects.
    async fn review(
        &mut self,
        candidate: &QueryCandidate,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<ErrorInfo>, Terminal> {
        let orch = self.orchestrator;
        let rows = match (&outcome.rows, candidate.kind) {
            (Some(rows), CandidateKind::Sql) if orch.config.review_results => rows,
            _ => return Ok(None),
        };

        let fut = orch
            .reviewer
            .review(&self.request.question, &candidate.text, rows);
        match guarded(fut, self.deadline, self.cancel).await? {
            Ok(ReviewVerdict::Approve) => Ok(None),
            Ok(ReviewVerdict::Reject(reason)) => {
                Ok(Some(ErrorInfo::new(ErrorKind::ResultMismatch, reason)))
            }
            Err(e) => {
                warn!(error = %e, "Reviewer unavailable, accepting result");
                Ok(None)
            }
        }
    }

    async fn repair(&mut self, failure: Failure) -> Phase {
        let orch = self.orchestrator;
        self.session.record_step(
            CorrectionState::Repair,
            format!("Recording {} and loading hints", failure.error.kind),
        );

        let mut hints = Vec::new();
        if let Some(memory) = &orch.memory {
            if failure.error.kind != ErrorKind::NoCandidate {
                self.remember(&failure).await;
            }

            let lookup = memory.lookup_similar(
                &self.session.tenant_id,
                &failure.tables,
                orch.config.hint_limit,
            );
            match guarded(lookup, self.deadline, self.cancel).await {
                Ok(Ok(found)) => hints = found,
                Ok(Err(e)) => {
                    warn!(error = %e, "Error memory lookup failed, repairing without hints")
                }
                Err(terminal) => return Phase::Failed(terminal.after(Some(failure.error))),
            }
        }

        self.session.last_signature = Some(failure.signature());

        if self.session.attempt >= orch.max_attempts() {
            let terminal = Terminal::new(
                ErrorKind::MaxRetriesExceeded,
                format!("Gave up after {} attempt(s)", self.session.attempt),
            );
            return Phase::Failed(terminal.after(Some(failure.error)));
        }

        self.session.attempt += 1;
        Phase::Generate(Some(RepairPlan { failure, hints }))
    }

    /// Records a failure in memory. Store faults are logged and skipped.
    async fn remember(&mut self, failure: &Failure) {
        let Some(memory) = &self.orchestrator.memory else {
            return;
        };
        let report = FailureReport {
            tenant_id: self.session.tenant_id.clone(),
            error_kind: failure.error.kind,
            error_message: failure.error.message.clone(),
            original_query: failure.candidate.text.clone(),
            table_context: failure.tables.clone(),
        };

        match guarded(memory.record_failure(&report), self.deadline, self.cancel).await {
            Ok(Ok(record)) => {
                self.session.recorded_hashes.insert(record.pattern_hash);
            }
            Ok(Err(e)) => warn!(error = %e, "Failed to record error pattern"),
            Err(_) => warn!("Skipped recording error pattern, request is ending"),
        }
    }

    async fn done(
        mut self,
        candidate: QueryCandidate,
        outcome: ExecutionOutcome,
    ) -> CorrectionReport {
        if let Some(memory) = &self.orchestrator.memory {
            for hash in &self.session.recorded_hashes {
                let credit =
                    memory.record_fix_success(&self.session.tenant_id, hash, &candidate.text);
                match guarded(credit, self.deadline, self.cancel).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, pattern_hash = %hash, "Failed to record fix"),
                    Err(_) => {
                        warn!("Skipped recording fixes, request is ending");
                        break;
                    }
                }
            }
        }

        self.session.record_step(
            CorrectionState::Done,
            format!("Answered after {} repair(s)", self.session.repairs()),
        );

        let (final_sql, analysis_code) = match candidate.kind {
            CandidateKind::Sql => (Some(candidate.text), None),
            CandidateKind::Analysis => (None, Some(candidate.text)),
        };

        CorrectionReport {
            session_id: self.session.session_id,
            status: CorrectionStatus::Done,
            final_sql,
            analysis_code,
            rows: outcome.rows,
            analysis_output: outcome.output,
            correction_attempts: self.session.repairs(),
            elapsed_ms: self.session.elapsed_ms(),
            steps: self.session.steps,
            history: self.session.history,
            failure: None,
        }
    }

    fn failed(mut self, terminal: Terminal) -> CorrectionReport {
        let last_error = terminal.last_error.or_else(|| {
            self.session
                .last_failure()
                .and_then(|attempt| attempt.error.clone())
        });
        let explanation = explain(
            terminal.kind,
            last_error.as_ref(),
            self.session.attempt,
            terminal.repeated,
        );

        warn!(
            session_id = %self.session.session_id,
            kind = %terminal.kind,
            attempts = self.session.attempt,
            "Correction session failed"
        );
        self.session.record_step(
            CorrectionState::Failed,
            format!("{}: {}", terminal.kind, terminal.message),
        );

        CorrectionReport {
            session_id: self.session.session_id,
            status: CorrectionStatus::Failed,
            final_sql: None,
            analysis_code: None,
            rows: None,
            analysis_output: None,
            correction_attempts: self.session.repairs(),
            elapsed_ms: self.session.elapsed_ms(),
            steps: self.session.steps,
            history: self.session.history,
            failure: Some(FailureSummary {
                kind: terminal.kind,
                message: terminal.message,
                explanation,
                last_error,
            }),
        }
    }
}
