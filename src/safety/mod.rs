//! SQL safety validation.
//!
//! Vets LLM-proposed SQL against a read-only security policy before it can
//! reach a datastore. The validator is a pure function: no I/O, no shared
//! mutable state, safe to call from any number of sessions at once.

mod tables;
mod validator;

pub use tables::table_references;
pub use validator::{opens_read_only, truncate_for_log, validate, SqlValidator, VettedSql};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason a SQL candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// The statement does not open with a read-only keyword.
    NotReadOnly(String),
    /// A deny-listed keyword appears as a standalone word.
    ForbiddenKeyword(String),
    /// A dangerous function is called.
    ForbiddenFunction(String),
    /// A statement terminator is followed by a mutating keyword.
    MultiStatement(String),
    /// A comment is used to smuggle a mutating keyword.
    CommentInjection(String),
}

impl ViolationKind {
    /// Returns the stable code for this violation, without its detail.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReadOnly(_) => "NOT_READ_ONLY",
            Self::ForbiddenKeyword(_) => "FORBIDDEN_KEYWORD",
            Self::ForbiddenFunction(_) => "FORBIDDEN_FUNCTION",
            Self::MultiStatement(_) => "MULTI_STATEMENT",
            Self::CommentInjection(_) => "COMMENT_INJECTION",
        }
    }

    /// Returns the keyword or function name that triggered the violation.
    pub fn detail(&self) -> &str {
        match self {
            Self::NotReadOnly(s)
            | Self::ForbiddenKeyword(s)
            | Self::ForbiddenFunction(s)
            | Self::MultiStatement(s)
            | Self::CommentInjection(s) => s,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code(), self.detail())
    }
}

/// The validator's accept/reject decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the SQL may be executed.
    pub safe: bool,
    /// Why the SQL was rejected, if it was.
    pub violation_kind: Option<ViolationKind>,
    /// Human-readable explanation, if rejected.
    pub message: Option<String>,
}

impl ValidationVerdict {
    /// Creates a verdict that accepts the SQL.
    pub fn safe() -> Self {
        Self {
            safe: true,
            violation_kind: None,
            message: None,
        }
    }

    /// Creates a verdict that rejects the SQL.
    pub fn unsafe_because(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            safe: false,
            violation_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    /// Returns the repair reason for a rejected verdict.
    pub fn reason(&self) -> String {
        match (&self.violation_kind, &self.message) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (Some(kind), None) => kind.to_string(),
            _ => "SQL accepted".to_string(),
        }
    }
}
