//! Error taxonomy and datastore-message classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Classified failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SecurityViolation,
    SyntaxError,
    ColumnNotExist,
    TableNotExist,
    AmbiguousColumn,
    GroupByError,
    TypeMismatch,
    DivisionByZero,
    ExecutionTimeout,
    SandboxTimeout,
    SandboxResourceExceeded,
    SandboxError,
    NoCandidate,
    ResultMismatch,
    ConnectionError,
    LlmError,
    InternalError,
    RequestTimeout,
    Cancelled,
    MaxRetriesExceeded,
    Unknown,
}

impl ErrorKind {
    /// Returns the stable string form, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::ColumnNotExist => "COLUMN_NOT_EXIST",
            Self::TableNotExist => "TABLE_NOT_EXIST",
            Self::AmbiguousColumn => "AMBIGUOUS_COLUMN",
            Self::GroupByError => "GROUP_BY_ERROR",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::DivisionByZero => "DIVISION_BY_ZERO",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::SandboxTimeout => "SANDBOX_TIMEOUT",
            Self::SandboxResourceExceeded => "SANDBOX_RESOURCE_EXCEEDED",
            Self::SandboxError => "SANDBOX_ERROR",
            Self::NoCandidate => "NO_CANDIDATE",
            Self::ResultMismatch => "RESULT_MISMATCH",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::LlmError => "LLM_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses the persisted string form. Unrecognized values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "SECURITY_VIOLATION" => Self::SecurityViolation,
            "SYNTAX_ERROR" => Self::SyntaxError,
            "COLUMN_NOT_EXIST" => Self::ColumnNotExist,
            "TABLE_NOT_EXIST" => Self::TableNotExist,
            "AMBIGUOUS_COLUMN" => Self::AmbiguousColumn,
            "GROUP_BY_ERROR" => Self::GroupByError,
            "TYPE_MISMATCH" => Self::TypeMismatch,
            "DIVISION_BY_ZERO" => Self::DivisionByZero,
            "EXECUTION_TIMEOUT" => Self::ExecutionTimeout,
            "SANDBOX_TIMEOUT" => Self::SandboxTimeout,
            "SANDBOX_RESOURCE_EXCEEDED" => Self::SandboxResourceExceeded,
            "SANDBOX_ERROR" => Self::SandboxError,
            "NO_CANDIDATE" => Self::NoCandidate,
            "RESULT_MISMATCH" => Self::ResultMismatch,
            "CONNECTION_ERROR" => Self::ConnectionError,
            "LLM_ERROR" => Self::LlmError,
            "INTERNAL_ERROR" => Self::InternalError,
            "REQUEST_TIMEOUT" => Self::RequestTimeout,
            "CANCELLED" => Self::Cancelled,
            "MAX_RETRIES_EXCEEDED" => Self::MaxRetriesExceeded,
            _ => Self::Unknown,
        }
    }

    /// Returns true if a repair attempt can reasonably fix this failure.
    ///
    /// Infrastructure faults and session-level terminations are not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ConnectionError
                | Self::LlmError
                | Self::InternalError
                | Self::RequestTimeout
                | Self::Cancelled
                | Self::MaxRetriesExceeded
        )
    }

    /// Returns true for the timeout kinds, whose repair asks for a simpler query.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ExecutionTimeout | Self::SandboxTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered rules; the first match wins.
static RULES: LazyLock<Vec<(ErrorKind, Regex)>> = LazyLock::new(|| {
    [
        (
            ErrorKind::ConnectionError,
            r"connection refused|could not connect|connection reset|broken pipe|server closed the connection|password authentication failed|unable to open database|pool timed out|no route to host|too many connections",
        ),
        (
            ErrorKind::ExecutionTimeout,
            r"statement timeout|canceling statement|query timed out|timed out after|maximum statement execution time|interrupted",
        ),
        (ErrorKind::DivisionByZero, r"division by zero|divide by zero"),
        (
            ErrorKind::AmbiguousColumn,
            r"ambiguous column|column reference .* is ambiguous|is ambiguous",
        ),
        (
            ErrorKind::ColumnNotExist,
            r"column .* does not exist|no such column|unknown column|invalid column name|has no column named",
        ),
        (
            ErrorKind::TableNotExist,
            r"relation .* does not exist|no such table|table .* doesn'?t exist|table .* does not exist|invalid object name|missing from-clause entry",
        ),
        (
            ErrorKind::GroupByError,
            r"group by clause|in group by|not in group by|isn'?t in group by|misuse of aggregate|aggregate functions are not allowed|must be an aggregate",
        ),
        (
            ErrorKind::TypeMismatch,
            r"operator does not exist|invalid input syntax for|cannot be cast|cannot cast|datatype mismatch|type mismatch|incompatible types|argument of .* must be type|could not convert|is of type .* but expression is of type",
        ),
        (
            ErrorKind::SyntaxError,
            r"syntax error|parse error|error in your sql syntax|incomplete input|unterminated|unexpected token|near .*: syntax",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("classification pattern is valid");
        (kind, re)
    })
    .collect()
});

/// Maps a datastore error message (PostgreSQL, SQLite or MySQL phrasing) to an `ErrorKind`.
pub fn classify_error(message: &str) -> ErrorKind {
    RULES
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}
