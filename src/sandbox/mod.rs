//! Code sandbox for LLM-authored analysis snippets.
//!
//! Each invocation runs a fixed harness in a fresh interpreter process with a
//! cleared environment. The process boundary is the hard isolation: a wall
//! clock timeout kills the child, and the memory ceiling is applied inside the
//! child as an address-space rlimit (best effort). A static scan runs first
//! and, by default, rejects flagged code before anything is spawned.

mod harness;
mod scan;

pub use scan::{scan, FindingRule, ScanFinding};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MendError, Result};
use harness::{HarnessReply, HarnessRequest, ReplyKind, ALLOWED_BUILTINS, HARNESS_SOURCE};

/// Default interpreter used for analysis code.
pub const DEFAULT_INTERPRETER: &str = "python3";

const MAX_STDOUT_CHARS: usize = 10_000;

/// Per-invocation resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Wall-clock budget, including interpreter startup.
    pub timeout: Duration,
    /// Address-space ceiling applied inside the child. Zero disables it.
    pub max_memory_mb: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_memory_mb: 512,
        }
    }
}

/// Why a sandbox run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "class", rename_all = "snake_case")]
pub enum SandboxErrorKind {
    /// The wall-clock budget ran out and the child was killed.
    Timeout,
    /// The memory ceiling was hit.
    MemoryExceeded,
    /// The code touched a name or construct outside the allow-list.
    ForbiddenName,
    /// The code raised; carries the exception class name.
    Exception(String),
    /// The sandbox itself failed (interpreter missing, unreadable reply).
    Internal,
}

/// Outcome of one sandbox invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    /// Value bound to `result` by the code.
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<SandboxErrorKind>,
    /// Captured `print` output.
    pub stdout: String,
    pub execution_time_s: f64,
    pub memory_used_mb: f64,
    /// Static-scan findings, rendered.
    pub warnings: Vec<String>,
}

impl SandboxResult {
    fn failure(kind: SandboxErrorKind, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            stdout: String::new(),
            execution_time_s: elapsed.as_secs_f64(),
            memory_used_mb: 0.0,
            warnings: Vec::new(),
        }
    }

    /// Returns true if the run was cut off by the wall-clock timeout.
    pub fn timed_out(&self) -> bool {
        matches!(self.error_kind, Some(SandboxErrorKind::Timeout))
    }
}

/// Runs analysis code in a child interpreter.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    interpreter: String,
    args: Vec<String>,
    reject_on_findings: bool,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

impl SandboxExecutor {
    /// Creates an executor for the given interpreter binary.
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: vec!["-I".to_string(), "-S".to_string()],
            reject_on_findings: true,
        }
    }

    /// Sets whether static-scan findings reject the code before execution.
    pub fn with_reject_on_findings(mut self, reject: bool) -> Self {
        self.reject_on_findings = reject;
        self
    }

    /// Returns the interpreter this executor spawns.
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Returns true if scan findings stop code before it runs.
    pub fn rejects_on_findings(&self) -> bool {
        self.reject_on_findings
    }

    /// Runs the static scan only.
    pub fn check(&self, code: &str) -> Vec<ScanFinding> {
        scan(code)
    }

    /// Executes `code` with `context` exposed as top-level variables.
    ///
    /// Never returns an error: every failure, including sandbox plumbing
    /// faults, is reported through the result.
    pub async fn execute(
        &self,
        code: &str,
        context: &Map<String, Value>,
        limits: SandboxLimits,
    ) -> SandboxResult {
        let start = Instant::now();
        let findings = scan(code);
        let warnings: Vec<String> = findings.iter().map(ToString::to_string).collect();

        if !findings.is_empty() && self.reject_on_findings {
            warn!(findings = findings.len(), "Rejected analysis code after static scan");
            let mut result = SandboxResult::failure(
                SandboxErrorKind::ForbiddenName,
                format!("Static scan rejected the code: {}", warnings.join("; ")),
                start.elapsed(),
            );
            result.warnings = warnings;
            return result;
        }

        let mut result = match tokio::time::timeout(
            limits.timeout,
            self.run_harness(code, context, limits.max_memory_mb),
        )
        .await
        {
            Ok(Ok(reply)) => reply_to_result(reply, start.elapsed()),
            Ok(Err(e)) => {
                warn!(error = %e, "Sandbox execution failed");
                SandboxResult::failure(SandboxErrorKind::Internal, e.to_string(), start.elapsed())
            }
            Err(_) => {
                // Dropping the harness future drops the child, which kills it.
                debug!(timeout_ms = limits.timeout.as_millis() as u64, "Sandbox timed out");
                SandboxResult::failure(
                    SandboxErrorKind::Timeout,
                    format!(
                        "Execution timed out after {:.1} seconds",
                        limits.timeout.as_secs_f64()
                    ),
                    start.elapsed(),
                )
            }
        };

        result.warnings = warnings;
        result
    }

    async fn run_harness(
        &self,
        code: &str,
        context: &Map<String, Value>,
        max_memory_mb: u64,
    ) -> Result<HarnessReply> {
        let request = HarnessRequest {
            code,
            context,
            allowed_builtins: ALLOWED_BUILTINS,
            max_memory_mb,
            max_stdout_chars: MAX_STDOUT_CHARS,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| MendError::sandbox(format!("Failed to encode request: {e}")))?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.args)
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            MendError::sandbox(format!("Failed to start '{}': {e}", self.interpreter))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| MendError::sandbox(format!("Failed to send request: {e}")))?;
            // Closing stdin signals end of request.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| MendError::sandbox(format!("Failed to collect output: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("MemoryError") {
                return Ok(HarnessReply {
                    kind: ReplyKind::Memory,
                    result: Value::Null,
                    stdout: String::new(),
                    error_type: Some("MemoryError".to_string()),
                    error: Some("memory limit exceeded".to_string()),
                    memory_used_mb: 0.0,
                });
            }
            return Err(MendError::sandbox(format!(
                "Interpreter exited with {} and no reply",
                output.status
            )));
        };

        serde_json::from_str(line)
            .map_err(|e| MendError::sandbox(format!("Unreadable sandbox reply: {e}")))
    }
}

fn reply_to_result(reply: HarnessReply, elapsed: Duration) -> SandboxResult {
    let error_type = reply.error_type.unwrap_or_else(|| "Error".to_string());
    let error = reply
        .error
        .map(|message| format!("{error_type}: {message}"));

    let (success, error_kind) = match reply.kind {
        ReplyKind::Ok => (true, None),
        ReplyKind::Memory => (false, Some(SandboxErrorKind::MemoryExceeded)),
        ReplyKind::Forbidden => (false, Some(SandboxErrorKind::ForbiddenName)),
        ReplyKind::Exception => (false, Some(SandboxErrorKind::Exception(error_type))),
    };

    SandboxResult {
        success,
        output: success.then_some(reply.result),
        error: if success { None } else { error },
        error_kind,
        stdout: reply.stdout,
        execution_time_s: elapsed.as_secs_f64(),
        memory_used_mb: reply.memory_used_mb,
        warnings: Vec::new(),
    }
}
