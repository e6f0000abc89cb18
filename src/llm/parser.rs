//! Response parsing for LLM outputs.
//!
//! Extracts a candidate from markdown code blocks. A `sql` block wins over a
//! `python` block, which wins over an unlabeled block; with no block at all,
//! the whole reply is taken as SQL if it opens with a read-only keyword.

use serde::{Deserialize, Serialize};

use crate::safety::opens_read_only;

/// Which execution path a candidate takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    /// SQL run against the datastore.
    Sql,
    /// Python analysis code run in the sandbox.
    Analysis,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Analysis => "analysis",
        }
    }
}

/// Result of parsing an LLM response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Explanatory text around the code block.
    pub text: String,
    /// Extracted code and its kind, if found.
    pub code: Option<(CandidateKind, String)>,
}

impl ParsedResponse {
    fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
        }
    }

    fn with_code(text: impl Into<String>, kind: CandidateKind, code: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: Some((kind, code.into())),
        }
    }
}

/// Parses an LLM response into explanatory text and an optional candidate.
///
/// The first block of the preferred kind is used. Empty blocks are ignored.
pub fn parse_llm_response(response: &str) -> ParsedResponse {
    let labeled = [
        ("sql", CandidateKind::Sql),
        ("python", CandidateKind::Analysis),
        ("py", CandidateKind::Analysis),
    ];

    for (lang, kind) in labeled {
        if let Some(block) = find_code_block(response, lang) {
            if let Some(parsed) = block.into_parsed(response, kind) {
                return parsed;
            }
        }
    }

    if let Some(block) = find_code_block(response, "") {
        if opens_read_only(block.content(response)) {
            if let Some(parsed) = block.into_parsed(response, CandidateKind::Sql) {
                return parsed;
            }
        }
    }

    let trimmed = response.trim();
    if !trimmed.contains("```") && opens_read_only(trimmed) {
        return ParsedResponse::with_code("", CandidateKind::Sql, trimmed);
    }

    ParsedResponse::text_only(trimmed)
}

/// Byte offsets of a fenced block: fence start, content start, content end, fence end.
#[derive(Debug, Clone, Copy)]
struct CodeBlock {
    start: usize,
    content_start: usize,
    content_end: usize,
    end: usize,
}

impl CodeBlock {
    fn content<'a>(&self, text: &'a str) -> &'a str {
        text[self.content_start..self.content_end].trim()
    }

    fn into_parsed(self, text: &str, kind: CandidateKind) -> Option<ParsedResponse> {
        let code = self.content(text);
        if code.is_empty() {
            return None;
        }
        let remaining = format!(
            "{} {}",
            text[..self.start].trim_end(),
            text[self.end..].trim_start()
        );
        Some(ParsedResponse::with_code(remaining.trim(), kind, code))
    }
}

/// Finds the first fenced block whose info string is exactly `lang`
/// (case-insensitive). Pass an empty string for unlabeled blocks.
fn find_code_block(text: &str, lang: &str) -> Option<CodeBlock> {
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find("```") {
        let start = search_from + offset;
        let info_start = start + 3;
        let newline = text[info_start..].find('\n')? + info_start;
        let content_start = newline + 1;
        let close = text[content_start..].find("```")? + content_start;
        let end = close + 3;

        let info = text[info_start..newline].trim();
        if info.eq_ignore_ascii_case(lang) {
            return Some(CodeBlock {
                start,
                content_start,
                content_end: close,
                end,
            });
        }

        search_from = end;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(parsed: &ParsedResponse) -> Option<(CandidateKind, &str)> {
        parsed.code.as_ref().map(|(k, c)| (*k, c.as_str()))
    }

    #[test]
    fn test_extract_sql_code_block() {
        let response = r#"Here's the query:

```sql
SELECT * FROM users;
```

This will return all users."#;

        let parsed = parse_llm_response(response);

        assert_eq!(
            code(&parsed),
            Some((CandidateKind::Sql, "SELECT * FROM users;"))
        );
        assert!(parsed.text.contains("Here's the query:"));
        assert!(parsed.text.contains("This will return all users."));
    }

    #[test]
    fn test_extract_python_block() {
        let response = "```python\nresult = sum(r[1] for r in rows)\n```";
        let parsed = parse_llm_response(response);
        assert_eq!(
            code(&parsed),
            Some((CandidateKind::Analysis, "result = sum(r[1] for r in rows)"))
        );
    }

    #[test]
    fn test_sql_block_preferred_over_others() {
        let response = "```python\nprint(1)\n```\n\n```\nnot sql\n```\n\n```SQL\nSELECT 2\n```";
        let parsed = parse_llm_response(response);
        assert_eq!(code(&parsed), Some((CandidateKind::Sql, "SELECT 2")));
    }

    #[test]
    fn test_unlabeled_block_needs_read_only_opener() {
        let parsed = parse_llm_response("```\nSELECT COUNT(*) FROM orders;\n```");
        assert_eq!(
            code(&parsed),
            Some((CandidateKind::Sql, "SELECT COUNT(*) FROM orders;"))
        );

        let parsed = parse_llm_response("```\nI cannot answer that.\n```");
        assert_eq!(parsed.code, None);
    }

    #[test]
    fn test_bare_sql_accepted() {
        let parsed = parse_llm_response("  WITH t AS (SELECT 1) SELECT * FROM t  ");
        assert_eq!(
            code(&parsed),
            Some((CandidateKind::Sql, "WITH t AS (SELECT 1) SELECT * FROM t"))
        );
    }

    #[test]
    fn test_prose_yields_no_candidate() {
        let response = "I don't understand that question. Could you please clarify?";
        let parsed = parse_llm_response(response);
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.text, response);
    }

    #[test]
    fn test_bare_mutation_is_not_a_candidate() {
        assert_eq!(parse_llm_response("DELETE FROM users").code, None);
    }

    #[test]
    fn test_fenced_mutation_still_extracted() {
        let parsed = parse_llm_response("```sql\nDROP TABLE users;\n```");
        assert_eq!(code(&parsed), Some((CandidateKind::Sql, "DROP TABLE users;")));
    }

    #[test]
    fn test_multiple_sql_blocks_uses_first() {
        let response = "```sql\nSELECT 1;\n```\nor\n```sql\nSELECT 2;\n```";
        assert_eq!(
            code(&parse_llm_response(response)),
            Some((CandidateKind::Sql, "SELECT 1;"))
        );
    }

    #[test]
    fn test_empty_block_skipped() {
        let response = "```sql\n\n```\n```python\nresult = 1\n```";
        assert_eq!(
            code(&parse_llm_response(response)),
            Some((CandidateKind::Analysis, "result = 1"))
        );
    }

    #[test]
    fn test_unterminated_block() {
        let parsed = parse_llm_response("```sql\nSELECT 1");
        assert_eq!(parsed.code, None);
    }

    #[test]
    fn test_empty_response() {
        let parsed = parse_llm_response("");
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.text, "");
    }
}
