//! Read-only SQL policy.
//!
//! The allow-list on the leading keyword is the primary defense; the
//! deny-list, dangerous-function and injection scans are defense in depth.
//! None of this is a SQL parser: the scans are word-boundary regexes over the
//! statement text, with literals and comments masked where noted.

use regex::Regex;
use std::sync::LazyLock;

use super::{ValidationVerdict, ViolationKind};

/// Keywords a statement may open with.
const READ_ONLY_OPENERS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "SHOW", "EXPLAIN", "DESCRIBE", "DESC",
];

/// Single-word statement verbs that mutate data, schema, privileges or the server.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "UPDATE", "DELETE", "INSERT", "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE",
    "RENAME", "COMMENT", "LOCK", "UNLOCK", "EXEC", "EXECUTE", "CALL", "MERGE", "COPY", "ATTACH",
    "DETACH", "VACUUM", "PRAGMA", "SHUTDOWN", "INTO",
];

/// Multi-word forms, checked before the single-word list.
const FORBIDDEN_PHRASES: &[(&str, &str)] = &[
    ("REPLACE INTO", r"\bREPLACE\s+INTO\b"),
    ("INTO OUTFILE", r"\bINTO\s+OUTFILE\b"),
    ("INTO DUMPFILE", r"\bINTO\s+DUMPFILE\b"),
    ("LOAD DATA", r"\bLOAD\s+DATA\b"),
];

/// Server-side file access, remote links, program execution and stalling.
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "pg_file_write",
    "pg_file_rename",
    "pg_file_unlink",
    "lo_import",
    "lo_export",
    "lo_from_bytea",
    "lo_put",
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_open",
    "pg_sleep",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "set_config",
    "load_file",
    "load_extension",
    "sys_exec",
    "sys_eval",
    "xp_cmdshell",
    "xp_dirtree",
    "openrowset",
    "opendatasource",
    "openquery",
    "readfile",
    "writefile",
    "sleep",
    "benchmark",
];

/// Verbs that count as "mutating" when they appear in injection position.
const INJECTION_VERBS: &str = "UPDATE|DELETE|INSERT|DROP|TRUNCATE|ALTER|GRANT|REVOKE|CREATE|\
    REPLACE|RENAME|COMMENT|LOCK|UNLOCK|EXEC|EXECUTE|CALL|MERGE|COPY|ATTACH|DETACH|VACUUM|\
    PRAGMA|SET|SHUTDOWN|LOAD";

const LOG_TRUNCATE_CHARS: usize = 200;

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FORBIDDEN_KEYWORDS.join("|");
    Regex::new(&format!(r"\b({alternation})\b")).expect("keyword pattern is valid")
});

static PHRASE_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FORBIDDEN_PHRASES
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(pattern).expect("phrase pattern is valid")))
        .collect()
});

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FORBIDDEN_FUNCTIONS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\s*\(")).expect("function pattern is valid")
});

static STATEMENT_INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r";\s*({INJECTION_VERBS})\b")).expect("injection pattern is valid")
});

static COMMENT_INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:--[ \t]*|/\*\s*|\*/\s*)({INJECTION_VERBS})\b"))
        .expect("comment injection pattern is valid")
});

static LEADING_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s(]*([A-Za-z_]+)").expect("leading word pattern is valid"));

/// SQL that passed validation.
///
/// Only the validator can construct this, so any API that takes a `VettedSql`
/// cannot be handed unchecked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VettedSql(String);

impl VettedSql {
    /// Returns the SQL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper, returning the SQL text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Stateless SQL validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlValidator;

impl SqlValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Classifies the SQL as safe or unsafe.
    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        validate(sql)
    }

    /// Validates the SQL and, if safe, wraps it for execution.
    pub fn vet(&self, sql: &str) -> std::result::Result<VettedSql, ValidationVerdict> {
        let verdict = validate(sql);
        if verdict.safe {
            Ok(VettedSql(sql.to_string()))
        } else {
            Err(verdict)
        }
    }
}

/// Classifies the SQL as safe or unsafe.
///
/// Checks run in a fixed order and the first failure decides the verdict:
/// leading keyword, statement/comment injection, deny-listed keywords,
/// dangerous functions.
pub fn validate(sql: &str) -> ValidationVerdict {
    if sql.trim().is_empty() {
        return ValidationVerdict::safe();
    }

    let upper = sql.to_uppercase();

    if let Some(verdict) = check_leading_keyword(&upper) {
        return verdict;
    }

    if let Some(verdict) = check_injection(&mask_all_readings(&upper, Masking::Literals)) {
        return verdict;
    }

    let code = mask_all_readings(&upper, Masking::CommentsAndLiterals);

    if let Some(verdict) = check_forbidden_keywords(&code) {
        return verdict;
    }

    if let Some(verdict) = check_forbidden_functions(&code) {
        return verdict;
    }

    ValidationVerdict::safe()
}

/// Truncates SQL for inclusion in log lines.
pub fn truncate_for_log(sql: &str) -> String {
    let compact: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= LOG_TRUNCATE_CHARS {
        return compact;
    }
    let truncated: String = compact.chars().take(LOG_TRUNCATE_CHARS).collect();
    format!("{truncated}...")
}

/// Returns true if the first keyword outside comments is a read-only opener.
pub fn opens_read_only(sql: &str) -> bool {
    let stripped = mask_all_readings(&sql.to_uppercase(), Masking::Comments);
    LEADING_WORD_RE
        .captures(stripped.trim_start())
        .and_then(|caps| caps.get(1))
        .is_some_and(|m| READ_ONLY_OPENERS.contains(&m.as_str()))
}

fn check_leading_keyword(upper: &str) -> Option<ValidationVerdict> {
    let stripped = mask_all_readings(upper, Masking::Comments);
    let trimmed = stripped.trim_start();
    if trimmed.is_empty() {
        // Comment-only input: nothing executable, the injection scan still runs.
        return None;
    }

    let Some(word) = LEADING_WORD_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        let found: String = trimmed.chars().take(20).collect();
        return Some(ValidationVerdict::unsafe_because(
            ViolationKind::NotReadOnly(found.clone()),
            format!("Statement must start with a read-only keyword; found '{found}'"),
        ));
    };

    if READ_ONLY_OPENERS.contains(&word) {
        return None;
    }

    let statement = trimmed.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    for (name, re) in PHRASE_RES.iter() {
        if re.find(statement).is_some_and(|m| m.start() == 0) {
            return Some(forbidden_keyword(name));
        }
    }

    if FORBIDDEN_KEYWORDS.contains(&word) {
        return Some(forbidden_keyword(word));
    }

    Some(ValidationVerdict::unsafe_because(
        ViolationKind::NotReadOnly(word.to_string()),
        format!(
            "Statement must start with a read-only keyword ({}); found '{word}'",
            READ_ONLY_OPENERS.join(", ")
        ),
    ))
}

/// Runs over text with literals blanked and comments kept.
fn check_injection(text: &str) -> Option<ValidationVerdict> {
    if let Some(caps) = STATEMENT_INJECTION_RE.captures(text) {
        let verb = caps[1].to_string();
        return Some(ValidationVerdict::unsafe_because(
            ViolationKind::MultiStatement(verb.clone()),
            format!("Multiple statements are not allowed; '{verb}' follows a statement terminator"),
        ));
    }

    if let Some(caps) = COMMENT_INJECTION_RE.captures(text) {
        let verb = caps[1].to_string();
        return Some(ValidationVerdict::unsafe_because(
            ViolationKind::CommentInjection(verb.clone()),
            format!("Comment used to smuggle '{verb}' past the read-only check"),
        ));
    }

    None
}

fn check_forbidden_keywords(masked: &str) -> Option<ValidationVerdict> {
    for (name, re) in PHRASE_RES.iter() {
        if re.is_match(masked) {
            return Some(forbidden_keyword(name));
        }
    }

    KEYWORD_RE
        .captures(masked)
        .map(|caps| forbidden_keyword(&caps[1]))
}

fn check_forbidden_functions(masked: &str) -> Option<ValidationVerdict> {
    FUNCTION_RE.captures(masked).map(|caps| {
        let name = caps[1].to_lowercase();
        ValidationVerdict::unsafe_because(
            ViolationKind::ForbiddenFunction(name.clone()),
            format!("Call to forbidden function '{name}()'"),
        )
    })
}

fn forbidden_keyword(keyword: &str) -> ValidationVerdict {
    ValidationVerdict::unsafe_because(
        ViolationKind::ForbiddenKeyword(keyword.to_string()),
        format!("Forbidden keyword '{keyword}'; only read-only queries are allowed"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Masking {
    Comments,
    Literals,
    CommentsAndLiterals,
}

/// How one datastore splits text into code, literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lexer {
    /// Characters that open a literal or quoted identifier.
    quotes: &'static [char],
    /// Quotes inside which a backslash escapes the next character.
    backslash_quotes: &'static [char],
    /// `E'..'` strings take backslash escapes.
    e_strings: bool,
    /// `$tag$..$tag$` strings.
    dollar_quotes: bool,
    /// `#` comments, `--` only before whitespace, `/*! .. */` is executed.
    mysql_comments: bool,
}

const POSTGRES: Lexer = Lexer {
    quotes: &['\'', '"'],
    backslash_quotes: &[],
    e_strings: true,
    dollar_quotes: true,
    mysql_comments: false,
};

/// PostgreSQL with `standard_conforming_strings = off`.
const POSTGRES_LEGACY: Lexer = Lexer {
    backslash_quotes: &['\''],
    ..POSTGRES
};

const MYSQL: Lexer = Lexer {
    quotes: &['\'', '"', '`'],
    backslash_quotes: &['\'', '"'],
    e_strings: false,
    dollar_quotes: false,
    mysql_comments: true,
};

const SQLITE: Lexer = Lexer {
    quotes: &['\'', '"', '`'],
    backslash_quotes: &[],
    e_strings: false,
    dollar_quotes: false,
    mysql_comments: false,
};

const READINGS: [Lexer; 4] = [POSTGRES, POSTGRES_LEGACY, MYSQL, SQLITE];

#[derive(Debug, Clone, PartialEq, Eq)]
enum LexState {
    Code,
    Quoted { quote: char, backslash: bool },
    Dollar(String),
    LineComment,
    BlockComment,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Masks under every reading and keeps a character visible if any reading
/// sees it as code. Text is only treated as a literal or comment when all
/// supported datastores agree.
fn mask_all_readings(sql: &str, masking: Masking) -> String {
    let readings: Vec<Vec<char>> = READINGS
        .iter()
        .map(|lexer| mask(sql, masking, *lexer).chars().collect())
        .collect();

    sql.chars()
        .enumerate()
        .map(|(i, c)| {
            if readings.iter().any(|reading| reading.get(i) == Some(&c)) {
                c
            } else {
                ' '
            }
        })
        .collect()
}

/// Replaces comments and/or literals (including quoted identifiers) with
/// spaces, one output character per input character.
///
/// Newlines are preserved so that line-comment boundaries survive masking.
fn mask(sql: &str, masking: Masking, lexer: Lexer) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut state = LexState::Code;
    let mut i = 0;

    let hide = |hidden: bool, c: char| match (hidden, c) {
        (false, _) | (true, '\n') => c,
        (true, _) => ' ',
    };
    let literal = |c: char| hide(masking != Masking::Comments, c);
    let comment = |c: char| hide(masking != Masking::Literals, c);
    let follows_word = |at: usize| at > 0 && is_word_char(chars[at - 1]);

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &state {
            LexState::Code => {
                let dash_comment = c == '-'
                    && next == Some('-')
                    && (!lexer.mysql_comments
                        || chars
                            .get(i + 2)
                            .map_or(true, |&after| after.is_whitespace() || after.is_control()));
                let block_comment = c == '/'
                    && next == Some('*')
                    && !(lexer.mysql_comments && chars.get(i + 2) == Some(&'!'));

                if dash_comment || block_comment {
                    state = if dash_comment {
                        LexState::LineComment
                    } else {
                        LexState::BlockComment
                    };
                    out.push(comment(c));
                    out.push(comment(chars[i + 1]));
                    i += 2;
                    continue;
                }
                if c == '#' && lexer.mysql_comments {
                    state = LexState::LineComment;
                    out.push(comment(c));
                } else if lexer.quotes.contains(&c) {
                    let e_string = lexer.e_strings
                        && c == '\''
                        && i > 0
                        && chars[i - 1].eq_ignore_ascii_case(&'e')
                        && !follows_word(i - 1);
                    state = LexState::Quoted {
                        quote: c,
                        backslash: e_string || lexer.backslash_quotes.contains(&c),
                    };
                    out.push(literal(c));
                } else if let Some(tag) = (c == '$' && lexer.dollar_quotes && !follows_word(i))
                    .then(|| dollar_tag(&chars, i))
                    .flatten()
                {
                    let len = tag.chars().count();
                    out.extend(chars[i..i + len].iter().map(|&t| literal(t)));
                    state = LexState::Dollar(tag);
                    i += len;
                    continue;
                } else {
                    out.push(c);
                }
            }
            LexState::Quoted { quote, backslash } => {
                let (quote, backslash) = (*quote, *backslash);
                if backslash && c == '\\' && next.is_some() {
                    out.push(literal(c));
                    out.push(literal(chars[i + 1]));
                    i += 2;
                    continue;
                }
                if c == quote {
                    if next == Some(quote) {
                        out.push(literal(c));
                        out.push(literal(c));
                        i += 2;
                        continue;
                    }
                    state = LexState::Code;
                }
                out.push(literal(c));
            }
            LexState::Dollar(tag) => {
                let tag_chars: Vec<char> = tag.chars().collect();
                if chars[i..].starts_with(&tag_chars) {
                    out.extend(tag_chars.iter().map(|&t| literal(t)));
                    i += tag_chars.len();
                    state = LexState::Code;
                    continue;
                }
                out.push(literal(c));
            }
            LexState::LineComment => {
                if c == '\n' {
                    state = LexState::Code;
                }
                out.push(comment(c));
            }
            LexState::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = LexState::Code;
                    out.push(comment(c));
                    out.push(comment('/'));
                    i += 2;
                    continue;
                }
                out.push(comment(c));
            }
        }
        i += 1;
    }

    out
}

/// Returns the `$tag$` opener starting at `start`, if there is one.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if end < chars.len() && chars[end] == '$' {
        // `$1` style placeholders are not dollar quotes.
        if end > start + 1 && chars[start + 1].is_ascii_digit() {
            return None;
        }
        Some(chars[start..=end].iter().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_safe(sql: &str) {
        let verdict = validate(sql);
        assert!(verdict.safe, "SQL: '{}' - expected safe, got {:?}", sql, verdict);
    }

    fn assert_violation(sql: &str, expected: ViolationKind) {
        let verdict = validate(sql);
        assert!(!verdict.safe, "SQL: '{}' - expected unsafe", sql);
        assert_eq!(verdict.violation_kind, Some(expected), "SQL: '{}'", sql);
        assert!(verdict.message.is_some());
    }

    // Safe queries
    #[test]
    fn test_empty_and_whitespace_are_safe() {
        assert_safe("");
        assert_safe("   \n\t  ");
    }

    #[test]
    fn test_select_with_limit_is_safe() {
        assert_safe("SELECT * FROM users LIMIT 10");
    }

    #[test]
    fn test_read_only_openers_are_safe() {
        assert_safe("WITH active AS (SELECT * FROM users WHERE active) SELECT * FROM active");
        assert_safe("VALUES (1, 'a'), (2, 'b')");
        assert_safe("SHOW search_path");
        assert_safe("EXPLAIN SELECT * FROM orders");
        assert_safe("DESCRIBE users");
        assert_safe("desc users");
        assert_safe("(SELECT 1) UNION (SELECT 2)");
    }

    #[test]
    fn test_replace_function_is_not_replace_into() {
        assert_safe("SELECT REPLACE(name,'a','b') FROM t");
        assert_safe("select replace(email, '@', ' at ') from users");
    }

    #[test]
    fn test_keywords_inside_identifiers_are_ignored() {
        assert_safe("SELECT updated_at, created_by, is_deleted FROM accounts");
        assert_safe("SELECT dropoff_time FROM rides");
        assert_safe("SELECT * FROM insert_log");
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        assert_safe("SELECT * FROM audit WHERE action = 'DELETE'");
        assert_safe("SELECT * FROM notes WHERE body LIKE '%drop table%'");
        assert_safe("SELECT \"update\" FROM events");
    }

    #[test]
    fn test_comment_mentioning_keyword_outside_attack_position() {
        assert_safe("-- we never delete rows here\nSELECT * FROM users");
        assert_safe("SELECT id /* rows that would drop off */ FROM users");
    }

    #[test]
    fn test_trailing_semicolon_and_second_select_are_safe() {
        assert_safe("SELECT 1;");
        assert_safe("SELECT 1; SELECT 2");
    }

    #[test]
    fn test_order_by_desc_is_safe() {
        assert_safe("SELECT name FROM users ORDER BY created_at DESC LIMIT 5");
    }

    // Leading keyword
    #[test]
    fn test_delete_is_forbidden_keyword() {
        assert_violation(
            "DELETE FROM users WHERE id=1",
            ViolationKind::ForbiddenKeyword("DELETE".to_string()),
        );
    }

    #[test]
    fn test_replace_into_is_unsafe() {
        assert_violation(
            "REPLACE INTO t VALUES (1)",
            ViolationKind::ForbiddenKeyword("REPLACE INTO".to_string()),
        );
    }

    #[test]
    fn test_unknown_opener_is_not_read_only() {
        assert_violation(
            "SET search_path TO evil",
            ViolationKind::NotReadOnly("SET".to_string()),
        );
        assert_violation(
            "BEGIN; SELECT 1",
            ViolationKind::NotReadOnly("BEGIN".to_string()),
        );
    }

    #[test]
    fn test_opener_check_is_case_insensitive() {
        assert_safe("select * from users");
        assert_violation(
            "drop table users",
            ViolationKind::ForbiddenKeyword("DROP".to_string()),
        );
    }

    #[test]
    fn test_leading_comment_does_not_hide_opener() {
        assert_violation(
            "/* report */ UPDATE users SET admin = true",
            ViolationKind::ForbiddenKeyword("UPDATE".to_string()),
        );
    }

    // Injection
    #[test]
    fn test_semicolon_drop_is_multi_statement() {
        assert_violation(
            "SELECT 1; DROP TABLE t",
            ViolationKind::MultiStatement("DROP".to_string()),
        );
    }

    #[test]
    fn test_comment_injection_is_flagged() {
        assert_violation(
            "SELECT * FROM users --DELETE FROM users",
            ViolationKind::CommentInjection("DELETE".to_string()),
        );
        assert_violation(
            "SELECT * FROM users /**/ DROP TABLE users",
            ViolationKind::CommentInjection("DROP".to_string()),
        );
    }

    #[test]
    fn test_backslash_escape_cannot_hide_second_statement() {
        let verdict = validate(r"SELECT '\''; DROP TABLE t; -- '");
        assert!(!verdict.safe);
    }

    #[test]
    fn test_terminator_inside_literal_is_not_injection() {
        assert_safe("SELECT * FROM notes WHERE body = 'x; delete'");
        assert_safe("SELECT * FROM notes WHERE body = 'see -- drop'");
    }

    #[test]
    fn test_lexer_disagreement_cannot_hide_modifying_cte() {
        // PostgreSQL reads E'\' `' as one string and $$'$$ as another; other
        // datastores close the literals elsewhere.
        assert_violation(
            r"WITH x AS (SELECT E'\' `', $$'$$), d AS (DELETE FROM users RETURNING 1) SELECT 1 -- ` '",
            ViolationKind::ForbiddenKeyword("DELETE".to_string()),
        );
        assert_violation(
            r"SELECT '\'', (SELECT 1 FROM t WHERE 0 = 1 OR pg_sleep(5) IS NULL) -- '",
            ViolationKind::ForbiddenFunction("pg_sleep".to_string()),
        );
    }

    #[test]
    fn test_mysql_executable_comment_is_code() {
        assert_violation(
            "SELECT 1 /*! , (SELECT 1 INTO OUTFILE '/tmp/x') */",
            ViolationKind::ForbiddenKeyword("INTO OUTFILE".to_string()),
        );
    }

    #[test]
    fn test_readings_differ_on_escapes() {
        let e_string = r"SELECT E'\'', 1";
        assert_eq!(
            mask(e_string, Masking::CommentsAndLiterals, POSTGRES),
            "SELECT E    , 1"
        );
        assert_eq!(
            mask(e_string, Masking::CommentsAndLiterals, SQLITE),
            format!("SELECT E{}", " ".repeat(7))
        );

        let plain = r"SELECT '\', 1";
        assert_eq!(
            mask(plain, Masking::CommentsAndLiterals, POSTGRES),
            "SELECT    , 1"
        );
        assert_eq!(
            mask(plain, Masking::CommentsAndLiterals, MYSQL),
            format!("SELECT {}", " ".repeat(6))
        );
        // Visible if any reading sees code.
        assert_eq!(
            mask_all_readings(plain, Masking::CommentsAndLiterals),
            "SELECT    , 1"
        );
    }

    // Deny-listed keywords
    #[test]
    fn test_data_modifying_cte_is_forbidden() {
        assert_violation(
            "WITH d AS (DELETE FROM users RETURNING *) SELECT * FROM d",
            ViolationKind::ForbiddenKeyword("DELETE".to_string()),
        );
    }

    #[test]
    fn test_select_into_is_forbidden() {
        assert_violation(
            "SELECT * INTO backup_users FROM users",
            ViolationKind::ForbiddenKeyword("INTO".to_string()),
        );
        assert_violation(
            "SELECT * FROM users INTO OUTFILE '/tmp/x'",
            ViolationKind::ForbiddenKeyword("INTO OUTFILE".to_string()),
        );
    }

    #[test]
    fn test_explain_analyze_delete_is_forbidden() {
        assert_violation(
            "EXPLAIN ANALYZE DELETE FROM users",
            ViolationKind::ForbiddenKeyword("DELETE".to_string()),
        );
    }

    #[test]
    fn test_dollar_quoted_literal_is_masked() {
        let masked = mask(
            "SELECT $tag$drop$tag$, $1 AS n",
            Masking::CommentsAndLiterals,
            POSTGRES,
        );
        assert!(!masked.contains("drop"));
        assert!(masked.contains("$1 AS n"));
    }

    // Dangerous functions
    #[test]
    fn test_forbidden_functions() {
        assert_violation(
            "SELECT pg_read_file('/etc/passwd')",
            ViolationKind::ForbiddenFunction("pg_read_file".to_string()),
        );
        assert_violation(
            "SELECT * FROM DBLINK('host=evil', 'select 1') AS t(x int)",
            ViolationKind::ForbiddenFunction("dblink".to_string()),
        );
        assert_violation(
            "SELECT pg_sleep (30)",
            ViolationKind::ForbiddenFunction("pg_sleep".to_string()),
        );
    }

    #[test]
    fn test_function_name_without_call_is_not_flagged() {
        assert_safe("SELECT sleep_minutes FROM health");
    }

    // Purity
    #[test]
    fn test_validate_is_idempotent() {
        for sql in [
            "SELECT * FROM users",
            "DELETE FROM users",
            "SELECT 1; DROP TABLE t",
            "",
        ] {
            assert_eq!(validate(sql), validate(sql));
        }
    }

    #[test]
    fn test_vet_wraps_only_safe_sql() {
        let validator = SqlValidator::new();
        let vetted = validator.vet("SELECT 1").unwrap();
        assert_eq!(vetted.as_str(), "SELECT 1");

        let rejected = validator.vet("DROP TABLE users").unwrap_err();
        assert!(!rejected.safe);
    }

    // Masking
    #[test]
    fn test_mask_blanks_comments_and_literals() {
        let masked = mask(
            "SELECT 'x' -- c\nFROM t /* b */",
            Masking::CommentsAndLiterals,
            POSTGRES,
        );
        assert!(!masked.contains('x'));
        assert!(!masked.contains('c'));
        assert!(!masked.contains('b'));
        assert!(masked.contains("FROM t"));
    }

    #[test]
    fn test_mask_keeps_literals_when_only_comments_requested() {
        let masked = mask("SELECT 'x' -- c", Masking::Comments, POSTGRES);
        assert!(masked.contains("'x'"));
        assert!(!masked.contains('c'));
    }

    #[test]
    fn test_truncate_for_log() {
        let long = format!("SELECT {} FROM t", "a, ".repeat(200));
        let truncated = truncate_for_log(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), LOG_TRUNCATE_CHARS + 3);
        assert_eq!(truncate_for_log("SELECT\n  1"), "SELECT 1");
    }

    #[test]
    fn test_opens_read_only() {
        assert!(opens_read_only("-- top customers\nselect 1"));
        assert!(opens_read_only("(SELECT 1)"));
        assert!(opens_read_only("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(!opens_read_only("Here is the query you asked for"));
        assert!(!opens_read_only("DELETE FROM t"));
    }
}
