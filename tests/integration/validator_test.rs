//! Safety validator properties.

use proptest::prelude::*;
use sqlmend::safety::{opens_read_only, validate, SqlValidator, ViolationKind};

const MUTATING: &[&str] = &[
    "UPDATE", "DELETE", "INSERT", "DROP", "TRUNCATE", "ALTER", "GRANT", "CREATE",
];

fn identifier(prefix: &'static str) -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_map(move |s| format!("{prefix}_{s}"))
}

fn verb() -> impl Strategy<Value = String> {
    (prop::sample::select(MUTATING), any::<bool>()).prop_map(|(v, lower)| {
        if lower {
            v.to_lowercase()
        } else {
            v.to_string()
        }
    })
}

proptest! {
    #[test]
    fn validate_is_idempotent(sql in ".{0,120}") {
        prop_assert_eq!(validate(&sql), validate(&sql));
    }

    #[test]
    fn safe_statements_open_read_only(sql in "[ -~\n]{0,80}") {
        let verdict = validate(&sql);
        let code_free = sql.trim().is_empty() || sql.trim_start().starts_with("--") || sql.trim_start().starts_with("/*");
        if verdict.safe && !code_free {
            prop_assert!(opens_read_only(&sql), "accepted without read-only opener: {sql:?}");
        }
    }

    #[test]
    fn plain_selects_are_safe(column in identifier("c"), table in identifier("t"), limit in 1u32..1000) {
        let sql = format!("SELECT {column} FROM {table} WHERE {column} IS NOT NULL LIMIT {limit}");
        prop_assert!(validate(&sql).safe, "{}", sql);
    }

    #[test]
    fn mutating_openers_are_rejected(verb in verb(), table in identifier("t")) {
        let sql = format!("{verb} {table}");
        prop_assert!(!validate(&sql).safe, "{}", sql);
    }

    #[test]
    fn statement_after_terminator_is_rejected(verb in verb(), table in identifier("t")) {
        let sql = format!("SELECT 1; {verb} TABLE {table}");
        let verdict = validate(&sql);
        prop_assert!(!verdict.safe);
        prop_assert!(
            matches!(verdict.violation_kind, Some(ViolationKind::MultiStatement(_))),
            "{:?}",
            verdict
        );
    }

    #[test]
    fn standalone_deny_listed_keyword_is_rejected(verb in verb(), column in identifier("c"), table in identifier("t")) {
        let sql = format!("SELECT {column} FROM {table} WHERE {column} = 1 OR {verb} = 2");
        prop_assert!(!validate(&sql).safe, "{}", sql);
    }

    #[test]
    fn keywords_inside_literals_are_allowed(verb in verb(), table in identifier("t")) {
        let sql = format!("SELECT * FROM {table} WHERE note = 'please {verb} me'");
        prop_assert!(validate(&sql).safe, "{}", sql);
    }
}

#[test]
fn test_reference_cases() {
    let verdict = validate("DELETE FROM users WHERE id=1");
    assert!(!verdict.safe);
    assert_eq!(
        verdict.violation_kind,
        Some(ViolationKind::ForbiddenKeyword("DELETE".to_string()))
    );

    assert!(validate("SELECT * FROM users LIMIT 10").safe);
    assert!(validate("SELECT REPLACE(name,'a','b') FROM t").safe);
    assert!(!validate("REPLACE INTO t VALUES (1)").safe);

    let verdict = validate("SELECT 1; DROP TABLE t");
    assert_eq!(
        verdict.violation_kind.map(|k| k.code()),
        Some("MULTI_STATEMENT")
    );
}

#[test]
fn test_vet_only_wraps_safe_sql() {
    let validator = SqlValidator::new();
    assert_eq!(
        validator.vet("SELECT id FROM users").unwrap().as_str(),
        "SELECT id FROM users"
    );
    assert!(validator.vet("SELECT pg_sleep(10)").is_err());
}
