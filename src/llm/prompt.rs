//! Prompt construction for the Generator, Repairer and Reviewer roles.

use crate::db::Schema;
use crate::llm::parser::CandidateKind;
use crate::llm::types::Message;
use crate::memory::{ErrorKind, ErrorMemoryRecord};

/// System prompt template shared by generation and repair.
const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a SQL assistant for a {dialect} database. Generate SQL queries that answer business questions.

DATABASE SCHEMA:
{schema}

RULES:
- Generate a single read-only statement (SELECT or WITH ... SELECT)
- Never modify data or schema: no INSERT, UPDATE, DELETE, DROP, ALTER, CREATE or similar
- Do not use comments, multiple statements, or file, network or sleep functions
- Use only tables and columns that appear in the schema above
- Use appropriate JOINs based on foreign keys
- Limit results to 100 rows unless the question says otherwise

OUTPUT FORMAT:
Return the SQL query wrapped in ```sql code blocks.
If you need to explain something, put it before or after the code block."#;

const ANALYSIS_NOTE: &str = r#"
ANALYSIS:
The question comes with data already loaded into these Python variables: {names}.
If the answer needs computation over that data rather than a new query, reply with a ```python block instead.
The code may use only basic builtins (no imports, no files, no attributes starting with an underscore) and must assign its answer to a variable named `result`."#;

const REVIEW_PROMPT: &str = r#"You check whether a query result answers a business question.
Reply with APPROVE if it does.
Reply with REJECT: <reason> if the result clearly does not answer the question (wrong grain, wrong filter, missing columns)."#;

/// Rows of a result shown to the reviewer.
pub const REVIEW_PREVIEW_ROWS: usize = 10;

/// What the repair prompt needs to know about the failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    pub question: &'a str,
    pub failed_code: &'a str,
    pub failed_kind: CandidateKind,
    pub error_kind: ErrorKind,
    pub error_message: &'a str,
}

/// Builds the system prompt with the schema injected.
pub fn build_system_prompt(schema: &Schema, dialect: &str, context_names: &[String]) -> String {
    let mut prompt = SYSTEM_PROMPT_TEMPLATE
        .replace("{dialect}", dialect)
        .replace("{schema}", &schema.format_for_llm());

    if !context_names.is_empty() {
        prompt.push_str(&ANALYSIS_NOTE.replace("{names}", &context_names.join(", ")));
    }

    prompt
}

/// Messages for the first attempt. Hints only enter through repair.
pub fn build_generation_messages(
    schema: &Schema,
    dialect: &str,
    context_names: &[String],
    question: &str,
) -> Vec<Message> {
    vec![
        Message::system(build_system_prompt(schema, dialect, context_names)),
        Message::user(question),
    ]
}

/// Messages for a repair attempt.
pub fn build_repair_messages(
    schema: &Schema,
    dialect: &str,
    context_names: &[String],
    repair: &RepairContext<'_>,
    hints: &[ErrorMemoryRecord],
) -> Vec<Message> {
    let lang = match repair.failed_kind {
        CandidateKind::Sql => "sql",
        CandidateKind::Analysis => "python",
    };

    let mut request = format!(
        "The previous attempt failed.\n\nQuestion: {}\n\nFailed {}:\n```{lang}\n{}\n```\n\nError ({}): {}\n",
        repair.question,
        repair.failed_kind.as_str(),
        repair.failed_code,
        repair.error_kind,
        repair.error_message,
    );

    if repair.error_kind.is_timeout() {
        request.push_str(
            "\nThe attempt ran out of time. Write a simpler query: fewer joins, \
             tighter filters, no unbounded scans.\n",
        );
    }

    if !hints.is_empty() {
        request.push_str("\nSimilar past errors and their fixes:\n");
        request.push_str(&format_hints(hints));
    }

    request.push_str("\nReturn a corrected version in the same output format.");

    vec![
        Message::system(build_system_prompt(schema, dialect, context_names)),
        Message::user(request),
    ]
}

/// Messages asking whether a result answers the question.
pub fn build_review_messages(question: &str, sql: &str, preview: &str) -> Vec<Message> {
    vec![
        Message::system(REVIEW_PROMPT),
        Message::user(format!(
            "Question: {question}\n\nQuery:\n```sql\n{sql}\n```\n\nResult:\n{preview}"
        )),
    ]
}

/// Renders memory records as few-shot hints.
pub fn format_hints(hints: &[ErrorMemoryRecord]) -> String {
    let mut out = String::new();
    for hint in hints {
        out.push_str(&format!(
            "- {} on {}: {}\n  failed: {}\n",
            hint.error_kind,
            if hint.table_name.is_empty() {
                "(no tables)"
            } else {
                hint.table_name.as_str()
            },
            hint.error_message.lines().next().unwrap_or(""),
            compact(&hint.original_query),
        ));
        if let Some(fixed) = &hint.fixed_query {
            out.push_str(&format!("  fixed: {}\n", compact(fixed)));
        }
    }
    out
}

fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
