//! Error memory tests against an on-disk store.

use pretty_assertions::assert_eq;
use sqlmend::memory::{ErrorKind, ErrorMemoryStore, FailureReport, SqliteErrorMemory};
use std::sync::Arc;

fn report(tenant: &str, message: &str, query: &str) -> FailureReport {
    FailureReport {
        tenant_id: tenant.to_string(),
        error_kind: ErrorKind::ColumnNotExist,
        error_message: message.to_string(),
        original_query: query.to_string(),
        table_context: vec!["users".to_string()],
    }
}

#[tokio::test]
async fn test_concurrent_upserts_share_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteErrorMemory::open(&dir.path().join("memory.db"))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            // Same pattern, different literal column positions.
            let failure = report(
                "acme",
                &format!("column \"customer_id\" does not exist at character {}", 8 + i),
                &format!("SELECT customer_id FROM users LIMIT {i}"),
            );
            store.record_failure(&failure).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let records = store.top_patterns("acme", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].occurrence_count, 16);
    assert_eq!(records[0].table_name, "users");
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    let hash = {
        let store = SqliteErrorMemory::open(&path).await.unwrap();
        let record = store
            .record_failure(&report(
                "acme",
                "column \"customer_id\" does not exist",
                "SELECT customer_id FROM users",
            ))
            .await
            .unwrap();
        assert!(store
            .record_fix_success("acme", &record.pattern_hash, "SELECT id FROM users")
            .await
            .unwrap());
        store.close().await;
        record.pattern_hash
    };

    let store = SqliteErrorMemory::open(&path).await.unwrap();
    let record = store.get("acme", &hash).await.unwrap().unwrap();
    assert_eq!(record.fixed_query.as_deref(), Some("SELECT id FROM users"));
    assert_eq!(record.success_count, 1);

    let hints = store
        .lookup_similar("acme", &["users".to_string()], 3)
        .await
        .unwrap();
    assert_eq!(hints.len(), 1);
    assert!(store
        .lookup_similar("other", &["users".to_string()], 3)
        .await
        .unwrap()
        .is_empty());
}
