//! Failure signatures: normalized message plus a stable hash.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use super::ErrorKind;

static ERROR_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:error|fatal|detail|hint)\s*:\s*").expect("valid"));
static CONTEXT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:line \d+:.*|\^\s*)$").expect("valid"));
static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:at )?(?:line|position|character|offset|col)\s*:?\s*\d+").expect("valid")
});
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}(?:[ t]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:z|[+-]\d{2}:?\d{2})?)?")
        .expect("valid")
});
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid")
});
static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid"));
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("valid"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid"));

/// Identity of a failure, independent of incidental details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSignature {
    pub kind: ErrorKind,
    pub normalized_message: String,
    /// Sorted, lowercased, comma-joined table context.
    pub table_context: String,
    /// Hex-encoded SHA-256 of kind, normalized message and table context.
    pub pattern_hash: String,
}

impl ErrorSignature {
    /// Computes the signature of a failure.
    pub fn compute(kind: ErrorKind, message: &str, tables: &[String]) -> Self {
        let normalized_message = normalize_message(message);
        let table_context = normalize_tables(tables);

        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalized_message.as_bytes());
        hasher.update(b"\n");
        hasher.update(table_context.as_bytes());
        let pattern_hash = hex::encode(hasher.finalize());

        Self {
            kind,
            normalized_message,
            table_context,
            pattern_hash,
        }
    }
}

/// Normalizes an error message so that incidental details do not change its hash.
///
/// Identifiers (including double-quoted ones) are kept; positions, literals,
/// numbers, timestamps and UUIDs are replaced by placeholders.
pub fn normalize_message(message: &str) -> String {
    let lowered = message.to_lowercase();
    let text = ERROR_PREFIX_RE.replace_all(&lowered, "");
    let text = CONTEXT_LINE_RE.replace_all(&text, " ");
    let text = POSITION_RE.replace_all(&text, " ");
    let text = TIMESTAMP_RE.replace_all(&text, "<ts>");
    let text = UUID_RE.replace_all(&text, "<uuid>");
    let text = STRING_LITERAL_RE.replace_all(&text, "<str>");
    let text = NUMBER_RE.replace_all(&text, "<n>");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Sorts, lowercases, deduplicates and comma-joins table names.
pub fn normalize_tables(tables: &[String]) -> String {
    let mut names: Vec<String> = tables
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names.join(",")
}
