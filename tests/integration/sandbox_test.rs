//! Sandbox tests against a real interpreter.
//!
//! These tests need `python3` on PATH and skip otherwise.

use serde_json::{json, Map, Value};
use sqlmend::sandbox::{SandboxErrorKind, SandboxExecutor, SandboxLimits, DEFAULT_INTERPRETER};
use std::time::{Duration, Instant};

fn python_available() -> bool {
    std::process::Command::new(DEFAULT_INTERPRETER)
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn context(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("context must be an object"),
    }
}

#[tokio::test]
async fn test_result_and_context() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let executor = SandboxExecutor::default();
    let code = "totals = [r['amount'] for r in rows]\nprint(len(totals))\nresult = {'sum': sum(totals), 'max': max(totals)}";
    let result = executor
        .execute(
            code,
            &context(json!({"rows": [{"amount": 3}, {"amount": 9}, {"amount": 5}]})),
            SandboxLimits::default(),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, Some(json!({"sum": 17, "max": 9})));
    assert_eq!(result.stdout.trim(), "3");
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let limits = SandboxLimits {
        timeout: Duration::from_secs(1),
        ..SandboxLimits::default()
    };
    let start = Instant::now();
    let result = SandboxExecutor::default()
        .execute("while True:\n    pass", &Map::new(), limits)
        .await;

    assert!(result.timed_out());
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_forbidden_operations_never_run() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("written");
    let attempts = [
        format!("open('{}', 'w').write('x')", marker.display()),
        "import os\nresult = os.getcwd()".to_string(),
        "result = eval('1 + 1')".to_string(),
        "result = ().__class__.__bases__[0].__subclasses__()".to_string(),
    ];

    // With the static scan disabled the harness itself must still refuse.
    for reject in [true, false] {
        let executor = SandboxExecutor::default().with_reject_on_findings(reject);
        for code in &attempts {
            let result = executor.execute(code, &Map::new(), SandboxLimits::default()).await;
            assert!(!result.success, "ran: {code}");
            assert!(result.output.is_none());
        }
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_exception_is_reported_without_traceback() {
    if !python_available() {
        eprintln!("Skipping test: python3 not available");
        return;
    }

    let result = SandboxExecutor::default()
        .execute("result = 1 / 0", &Map::new(), SandboxLimits::default())
        .await;

    assert_eq!(
        result.error_kind,
        Some(SandboxErrorKind::Exception("ZeroDivisionError".to_string()))
    );
    let error = result.error.unwrap();
    assert!(error.starts_with("ZeroDivisionError"));
    assert!(!error.contains("Traceback"));
}

#[tokio::test]
async fn test_memory_ceiling() {
    if !python_available() || !cfg!(target_os = "linux") {
        eprintln!("Skipping test: needs python3 on Linux");
        return;
    }

    let limits = SandboxLimits {
        timeout: Duration::from_secs(5),
        max_memory_mb: 128,
    };
    let result = SandboxExecutor::default()
        .execute("big = [0] * (512 * 1024 * 1024)\nresult = len(big)", &Map::new(), limits)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(SandboxErrorKind::MemoryExceeded));
}
