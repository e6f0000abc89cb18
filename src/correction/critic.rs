//! Failure classification and the retry decision.

use crate::error::MendError;
use crate::memory::{classify_error, ErrorKind};
use crate::safety::ValidationVerdict;
use crate::sandbox::{SandboxErrorKind, SandboxResult};

use super::ErrorInfo;

/// What CRITIQUE decides about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    /// Worth a repair attempt.
    Retry,
    /// The kind cannot be fixed by rewriting the candidate.
    Fatal,
    /// Same signature as the previous failure; repairing again would loop.
    Repeated,
}

/// Decides whether a failure goes to REPAIR.
pub fn judge(error: &ErrorInfo, signature: &str, previous_signature: Option<&str>) -> Judgement {
    if !error.kind.is_retryable() {
        Judgement::Fatal
    } else if previous_signature == Some(signature) {
        Judgement::Repeated
    } else {
        Judgement::Retry
    }
}

/// Classifies a datastore failure.
pub fn error_from_datastore(err: &MendError) -> ErrorInfo {
    match err {
        MendError::Timeout(msg) => ErrorInfo::new(ErrorKind::ExecutionTimeout, msg.clone()),
        MendError::Connection(msg) => ErrorInfo::new(ErrorKind::ConnectionError, msg.clone()),
        MendError::Query(msg) => ErrorInfo::new(classify_error(msg), msg.clone()),
        other => ErrorInfo::new(ErrorKind::InternalError, other.to_string()),
    }
}

/// Classifies a failed sandbox run.
pub fn error_from_sandbox(result: &SandboxResult) -> ErrorInfo {
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "analysis code failed".to_string());

    let kind = match &result.error_kind {
        Some(SandboxErrorKind::Timeout) => ErrorKind::SandboxTimeout,
        Some(SandboxErrorKind::MemoryExceeded) | Some(SandboxErrorKind::ForbiddenName) => {
            ErrorKind::SandboxResourceExceeded
        }
        Some(SandboxErrorKind::Exception(_)) => ErrorKind::SandboxError,
        Some(SandboxErrorKind::Internal) | None => ErrorKind::InternalError,
    };

    ErrorInfo::new(kind, message)
}

/// Turns a validator rejection into a failure.
pub fn error_from_verdict(verdict: &ValidationVerdict) -> ErrorInfo {
    ErrorInfo::new(ErrorKind::SecurityViolation, verdict.reason())
}

/// Explains a terminal failure for the person who asked.
///
/// `attempts` is the number of candidates tried.
pub fn explain(
    kind: ErrorKind,
    last_error: Option<&ErrorInfo>,
    attempts: u32,
    repeated: bool,
) -> String {
    let last = last_error
        .map(|e| format!(" The last attempt failed with {}: {}", e.kind, first_line(&e.message)))
        .unwrap_or_default();

    if repeated {
        return format!(
            "The same {kind} error came back after a repair, so another attempt is unlikely to help.{last}"
        );
    }

    match kind {
        ErrorKind::MaxRetriesExceeded => format!(
            "No working query was found within {attempts} attempt{}.{last}",
            if attempts == 1 { "" } else { "s" }
        ),
        ErrorKind::ConnectionError => {
            format!("The database could not be reached, so the query was not retried.{last}")
        }
        ErrorKind::LlmError => "The language model could not be reached.".to_string(),
        ErrorKind::RequestTimeout => {
            format!("The request ran out of time after {attempts} attempt(s).{last}")
        }
        ErrorKind::Cancelled => "The request was cancelled.".to_string(),
        ErrorKind::InternalError => format!("An internal error stopped the request.{last}"),
        other => format!("The request failed with {other}.{last}"),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
