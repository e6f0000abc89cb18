//! End-to-end correction loop tests on in-memory SQLite.

use proptest::prelude::*;
use serde_json::json;
use sqlmend::correction::{CorrectionConfig, CorrectionState, Orchestrator, QueryRequest};
use sqlmend::db::{ClientOptions, DatabaseClient, MockDatabaseClient, MockFailure, SqliteClient};
use sqlmend::llm::MockLlmClient;
use sqlmend::memory::{ErrorKind, ErrorMemoryStore, SqliteErrorMemory};
use sqlmend::safety::validate;
use sqlmend::sandbox::{SandboxExecutor, SandboxLimits, DEFAULT_INTERPRETER};
use std::sync::Arc;
use std::time::Duration;

const SEED: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL REFERENCES users(id), total REAL NOT NULL)",
    "INSERT INTO users (id, email) VALUES (1, 'ada@example.com'), (2, 'bob@example.com')",
    "INSERT INTO orders (user_id, total) VALUES (1, 10.0), (1, 5.5), (2, 7.25)",
];

async fn seeded_db() -> Arc<SqliteClient> {
    let client = SqliteClient::connect("sqlite::memory:", ClientOptions::default())
        .await
        .unwrap();
    for statement in SEED {
        sqlx::query(statement).execute(client.pool()).await.unwrap();
    }
    Arc::new(client)
}

fn fenced(sql: &str) -> String {
    format!("Here you go:\n```sql\n{sql}\n```")
}

fn python(code: &str) -> String {
    format!("```python\n{code}\n```")
}

fn python_available() -> bool {
    std::process::Command::new(DEFAULT_INTERPRETER)
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

#[tokio::test]
async fn test_schema_error_is_repaired_and_remembered() {
    let db = seeded_db().await;
    let schema = db.introspect_schema().await.unwrap();
    let memory = Arc::new(SqliteErrorMemory::in_memory().await.unwrap());

    let llm = Arc::new(
        MockLlmClient::new()
            .with_sql("SELECT customer_id, COUNT(*) FROM users GROUP BY customer_id")
            .with_sql("SELECT user_id, COUNT(*) AS orders FROM orders GROUP BY user_id ORDER BY user_id"),
    );
    let orchestrator = Orchestrator::new(llm.clone(), db.clone(), CorrectionConfig::default())
        .with_memory(memory.clone());

    let report = orchestrator
        .run(QueryRequest::new("acme", "Orders per customer", schema.clone()))
        .await;

    assert!(report.is_done(), "{:?}", report.failure);
    assert_eq!(report.correction_attempts, 1);
    assert_eq!(report.rows.as_ref().unwrap().row_count(), 2);
    assert_eq!(
        report.history[0].error.as_ref().unwrap().kind,
        ErrorKind::ColumnNotExist
    );

    let records = memory.top_patterns("acme", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind, ErrorKind::ColumnNotExist);
    assert_eq!(records[0].table_name, "users");
    assert_eq!(records[0].success_count, 1);

    // A later session making the same mistake sees the stored fix.
    let llm = Arc::new(
        MockLlmClient::new()
            .with_sql("SELECT customer_id FROM users")
            .with_sql("SELECT id FROM users"),
    );
    let orchestrator = Orchestrator::new(llm.clone(), db.clone(), CorrectionConfig::default())
        .with_memory(memory.clone());
    let report = orchestrator
        .run(QueryRequest::new("acme", "Customer ids", schema))
        .await;

    assert!(report.is_done());
    let repair_prompt = &llm.calls()[1][1].content;
    assert!(repair_prompt.contains("COLUMN_NOT_EXIST on users"));
    assert!(repair_prompt.contains("fixed: SELECT user_id, COUNT(*) AS orders FROM orders"));
}

#[tokio::test]
async fn test_injection_never_reaches_the_datastore() {
    let db = seeded_db().await;
    let schema = db.introspect_schema().await.unwrap();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_sql("SELECT * FROM users; DROP TABLE users")
            .with_sql("SELECT email FROM users WHERE id = 1 -- DELETE FROM users")
            .with_sql("SELECT email FROM users WHERE id = 1"),
    );
    let orchestrator = Orchestrator::new(llm, db.clone(), CorrectionConfig::default());

    let report = orchestrator
        .run(QueryRequest::new("acme", "Email of user 1", schema))
        .await;

    assert!(report.is_done());
    let kinds: Vec<_> = report
        .history
        .iter()
        .filter_map(|a| a.error.as_ref().map(|e| e.kind))
        .collect();
    assert_eq!(kinds, vec![ErrorKind::SecurityViolation, ErrorKind::SecurityViolation]);

    // No EXECUTE step ran for the rejected candidates.
    let executes = report
        .steps
        .iter()
        .filter(|s| s.state == CorrectionState::Execute)
        .count();
    assert_eq!(executes, 1);

    let still_there = db.introspect_schema().await.unwrap();
    assert!(still_there.table("users").is_some());
}

#[tokio::test]
async fn test_failure_report_explains() {
    let db = seeded_db().await;
    let schema = db.introspect_schema().await.unwrap();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_sql("SELECT name FROM users")
            .with_sql("SELECT username FROM users")
            .with_sql("SELECT full_name FROM users"),
    );
    let orchestrator = Orchestrator::new(llm, db, CorrectionConfig::default());

    let report = orchestrator
        .run(QueryRequest::new("acme", "User names", schema))
        .await;

    assert!(!report.is_done());
    assert_eq!(report.correction_attempts, 2);
    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::MaxRetriesExceeded);
    assert!(failure
        .last_error
        .unwrap()
        .message
        .contains("no such column: full_name"));
    assert!(!failure.explanation.is_empty());
    assert_eq!(
        report.steps.last().map(|s| s.state),
        Some(CorrectionState::Failed)
    );
}

#[tokio::test]
async fn test_analysis_repair_reads_previous_rows() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let db = seeded_db().await;
    let schema = db.introspect_schema().await.unwrap();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_sql("SELECT id FROM users ORDER BY id")
            .with_reply("REJECT: the question asks for a total, not a list")
            .with_reply(python(
                "result = {'total': sum(r[0] for r in rows), 'columns': columns}",
            )),
    );
    let config = CorrectionConfig {
        review_results: true,
        ..CorrectionConfig::default()
    };
    let orchestrator = Orchestrator::new(llm, db, config)
        .with_sandbox(SandboxExecutor::default(), SandboxLimits::default());

    let report = orchestrator
        .run(QueryRequest::new("acme", "Sum of user ids", schema))
        .await;

    assert!(report.is_done(), "{:?}", report.failure);
    assert_eq!(report.final_sql, None);
    assert!(report
        .analysis_code
        .as_deref()
        .is_some_and(|code| code.contains("sum(r[0] for r in rows)")));
    assert_eq!(
        report.analysis_output,
        Some(json!({"total": 3, "columns": ["id"]}))
    );
    assert_eq!(
        report.history[0].error.as_ref().unwrap().kind,
        ErrorKind::ResultMismatch
    );
    assert_eq!(report.correction_attempts, 1);
}

#[tokio::test]
async fn test_sandbox_timeout_is_repaired() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let db = seeded_db().await;
    let schema = db.introspect_schema().await.unwrap();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_reply(python("while True:\n    pass"))
            .with_reply(python("result = 42")),
    );
    let limits = SandboxLimits {
        timeout: Duration::from_secs(1),
        ..SandboxLimits::default()
    };
    let orchestrator = Orchestrator::new(llm.clone(), db, CorrectionConfig::default())
        .with_sandbox(SandboxExecutor::default(), limits);

    let report = orchestrator
        .run(QueryRequest::new("acme", "The answer", schema))
        .await;

    assert!(report.is_done(), "{:?}", report.failure);
    assert_eq!(
        report.history[0].error.as_ref().unwrap().kind,
        ErrorKind::SandboxTimeout
    );
    assert!(report
        .steps
        .iter()
        .any(|s| s.state == CorrectionState::Repair));
    assert_eq!(report.analysis_output, Some(json!(42)));
    assert_eq!(llm.call_count(), 2);
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Good,
    BadColumn(u8),
    Unsafe,
    NoCode,
    Slow,
}

fn reply() -> impl Strategy<Value = Reply> {
    prop_oneof![
        Just(Reply::Good),
        (0u8..4).prop_map(Reply::BadColumn),
        Just(Reply::Unsafe),
        Just(Reply::NoCode),
        Just(Reply::Slow),
    ]
}

fn render(reply: Reply) -> String {
    match reply {
        Reply::Good => fenced("SELECT id FROM users"),
        Reply::BadColumn(n) => fenced(&format!("SELECT col_{n} FROM users")),
        Reply::Unsafe => fenced("DELETE FROM users"),
        Reply::NoCode => "I am not sure what you mean.".to_string(),
        Reply::Slow => fenced("SELECT * FROM slow_table"),
    }
}

fn scripted_db() -> MockDatabaseClient {
    let mut db = MockDatabaseClient::new()
        .on_failure("slow_table", MockFailure::Timeout("Query timed out after 30 seconds".into()));
    for n in 0..4 {
        db = db.on_failure(
            format!("col_{n}"),
            MockFailure::Query(format!("no such column: col_{n}")),
        );
    }
    db.on_query("FROM users", vec![], vec![])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn loop_terminates_within_bound(replies in prop::collection::vec(reply(), 1..8), max_attempts in 1u32..5) {
        let report = tokio_test::block_on(async {
            let mut llm = MockLlmClient::new();
            for r in &replies {
                llm = llm.with_reply(render(*r));
            }
            let llm = llm.with_fallback(render(Reply::BadColumn(0)));
            let config = CorrectionConfig { max_attempts, ..CorrectionConfig::default() };
            Orchestrator::new(Arc::new(llm), Arc::new(scripted_db()), config)
                .run(QueryRequest::new("acme", "q", Default::default()))
                .await
        });

        prop_assert!(report.history.len() <= max_attempts as usize);
        prop_assert!(report.correction_attempts < max_attempts);
        prop_assert!(report.steps.last().is_some_and(|s| s.state.is_terminal()));
        prop_assert_eq!(report.is_done(), report.final_sql.is_some());
        if let Some(sql) = &report.final_sql {
            prop_assert!(validate(sql).safe);
        }
    }
}
