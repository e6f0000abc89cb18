//! PostgreSQL client tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use sqlmend::correction::error_from_datastore;
use sqlmend::db::{ClientOptions, DatabaseClient, PostgresClient, Value};
use sqlmend::memory::ErrorKind;
use sqlmend::safety::SqlValidator;
use std::time::Duration;

/// Helper to create a test client.
async fn get_test_client(options: ClientOptions) -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    PostgresClient::connect(&url, options).await.ok()
}

#[tokio::test]
async fn test_execute_simple_select() {
    let Some(client) = get_test_client(ClientOptions::default()).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = SqlValidator::new()
        .vet("SELECT 1 AS num, 'hello' AS greeting")
        .unwrap();
    let result = client.execute_query(&sql).await.unwrap();

    assert_eq!(result.column_names(), vec!["num", "greeting"]);
    assert_eq!(result.rows, vec![vec![Value::Int(1), Value::String("hello".into())]]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_row_cap_marks_truncation() {
    let options = ClientOptions {
        max_rows: 10,
        ..ClientOptions::default()
    };
    let Some(client) = get_test_client(options).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = SqlValidator::new()
        .vet("SELECT n FROM generate_series(1, 25) AS n")
        .unwrap();
    let result = client.execute_query(&sql).await.unwrap();

    assert_eq!(result.row_count(), 10);
    assert_eq!(result.total_rows, 25);
    assert!(result.was_truncated);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_column_is_classified() {
    let options = ClientOptions {
        query_timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    };
    let Some(client) = get_test_client(options).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = SqlValidator::new()
        .vet("SELECT customer_id FROM pg_catalog.pg_class LIMIT 1")
        .unwrap();
    let err = client.execute_query(&sql).await.unwrap_err();

    assert_eq!(err.category(), "Query Error");
    assert_eq!(error_from_datastore(&err).kind, ErrorKind::ColumnNotExist);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_introspect_schema() {
    let Some(client) = get_test_client(ClientOptions::default()).await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema().await.unwrap();
    for table in &schema.tables {
        assert!(!table.name.is_empty());
        assert!(!table.columns.is_empty());
    }

    client.close().await.unwrap();
}
