//! Subcommand wiring.
//!
//! Builds the collaborators a command needs from `Config` and hands the work
//! to the library. Returns the process exit code.

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{AskArgs, Cli, Command, SandboxArgs};
use crate::config::{redact_url, Config, MemoryConfig};
use crate::correction::{CorrectionReport, Orchestrator, QueryRequest};
use crate::db::{self, QueryResult};
use crate::llm::{create_client, LlmClient};
use crate::memory::{ErrorMemoryRecord, ErrorMemoryStore, SqliteErrorMemory};
use crate::safety::validate;
use crate::sandbox::{SandboxExecutor, SandboxResult};

/// Runs the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::load_from_file(&cli.config_path())?;
    if let Command::Ask(args) = &cli.command {
        apply_ask_overrides(&mut config, args);
    }
    config.apply_process_env()?;

    match cli.command {
        Command::Ask(args) => ask(config, args).await,
        Command::Validate { sql } => Ok(validate_sql(&sql)),
        Command::Sandbox(args) => sandbox(&config, args).await,
        Command::Memory { tenant, limit } => memory(&config.memory, &tenant, limit).await,
    }
}

/// Flags win over the file and the environment.
fn apply_ask_overrides(config: &mut Config, args: &AskArgs) {
    if let Some(url) = &args.database {
        config.datastore.url = Some(url.clone());
    }
    if let Some(provider) = args.llm {
        if provider != config.llm.provider {
            config.llm.base_url = None;
            config.llm.api_key = None;
        }
        config.llm.provider = provider;
        config.llm.model = Some(provider.default_model().to_string());
    }
    if let Some(max_attempts) = args.max_attempts {
        config.correction.max_attempts = max_attempts;
    }
}

async fn ask(config: Config, args: AskArgs) -> anyhow::Result<ExitCode> {
    let Some(url) = config.datastore.url.as_deref() else {
        bail!("No database configured. Pass --database or set SQLMEND_DATABASE_URL");
    };

    info!(database = %redact_url(url), provider = %config.llm.provider, "Connecting");
    let db: Arc<dyn db::DatabaseClient> =
        Arc::from(db::connect(url, config.datastore.client_options()).await?);
    let schema = db
        .introspect_schema()
        .await
        .context("Failed to introspect the database schema")?;
    let llm: Arc<dyn LlmClient> = Arc::from(create_client(&config.llm)?);

    let sandbox = SandboxExecutor::new(config.sandbox.interpreter.clone())
        .with_reject_on_findings(config.sandbox.reject_on_findings);
    let mut orchestrator = Orchestrator::new(llm, db.clone(), config.correction.to_correction_config())
        .with_sandbox(sandbox, config.sandbox.limits());
    if let Some(store) = open_memory(&config.memory).await {
        orchestrator = orchestrator.with_memory(store);
    }

    let context = match &args.context {
        Some(path) => load_context(path)?,
        None => Map::new(),
    };
    let request = QueryRequest::new(args.tenant, args.question, schema).with_context(context);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run_with_cancel(request, cancel).await;
    db.close().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    Ok(if report.is_done() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate_sql(sql: &str) -> ExitCode {
    let verdict = validate(sql);
    if verdict.safe {
        println!("SAFE");
        ExitCode::SUCCESS
    } else {
        println!("UNSAFE: {}", verdict.reason());
        ExitCode::FAILURE
    }
}

async fn sandbox(config: &Config, args: SandboxArgs) -> anyhow::Result<ExitCode> {
    let code = if args.file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read code from stdin")?;
        code
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("Failed to read {}", args.file.display()))?
    };
    let context = match &args.context {
        Some(path) => load_context(path)?,
        None => Map::new(),
    };

    let mut limits = config.sandbox.limits();
    if let Some(secs) = args.timeout {
        limits.timeout = Duration::from_secs(secs);
    }
    if let Some(mb) = args.memory_mb {
        limits.max_memory_mb = mb;
    }

    let executor = SandboxExecutor::new(config.sandbox.interpreter.clone())
        .with_reject_on_findings(config.sandbox.reject_on_findings);
    let result = executor.execute(&code, &context, limits).await;
    println!("{}", format_sandbox_result(&result));

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn memory(config: &MemoryConfig, tenant: &str, limit: usize) -> anyhow::Result<ExitCode> {
    let store = match &config.path {
        Some(path) => SqliteErrorMemory::open(path).await?,
        None => SqliteErrorMemory::open_default().await?,
    };
    let records = store.top_patterns(tenant, limit).await?;
    store.close().await;

    if records.is_empty() {
        println!("No error patterns recorded for tenant '{tenant}'.");
    } else {
        println!("{}", format_patterns(&records));
    }
    Ok(ExitCode::SUCCESS)
}

/// Opens the error memory; the pipeline runs without hints if it cannot.
async fn open_memory(config: &MemoryConfig) -> Option<Arc<dyn ErrorMemoryStore>> {
    if !config.enabled {
        return None;
    }
    let opened = match &config.path {
        Some(path) => SqliteErrorMemory::open(path).await,
        None => SqliteErrorMemory::open_default().await,
    };
    match opened {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "Error memory unavailable, continuing without it");
            None
        }
    }
}

/// Reads a JSON object whose keys become analysis variables.
fn load_context(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read context file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Context file {} is not valid JSON", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("Context file {} must hold a JSON object", path.display()),
    }
}

/// Renders a report for the terminal.
pub fn format_report(report: &CorrectionReport) -> String {
    let mut out = String::new();

    match (&report.final_sql, &report.analysis_code, &report.failure) {
        (Some(sql), _, _) => {
            out.push_str(&format!("SQL:\n{sql}\n\n"));
            if let Some(rows) = &report.rows {
                out.push_str(&format_rows(rows));
                out.push('\n');
            }
        }
        (None, Some(code), _) => {
            out.push_str(&format!("Analysis:\n{code}\n\nResult:\n"));
            let output = report.analysis_output.clone().unwrap_or(Value::Null);
            out.push_str(&serde_json::to_string_pretty(&output).unwrap_or_default());
            out.push('\n');
        }
        (None, None, Some(failure)) => {
            out.push_str(&format!("Failed ({}): {}\n", failure.kind, failure.explanation));
        }
        (None, None, None) => {}
    }

    out.push_str(&format!(
        "\n{} repair(s), {} ms",
        report.correction_attempts, report.elapsed_ms
    ));
    out
}

fn format_rows(rows: &QueryResult) -> String {
    let headers = rows.column_names();
    let cells: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_display_string()).collect())
        .collect();

    let mut out = format_table(&headers, &cells);
    out.push_str(&format!("\n({} row{})", rows.row_count(), if rows.row_count() == 1 { "" } else { "s" }));
    if rows.was_truncated {
        out.push_str(&format!(", truncated from {}", rows.total_rows));
    }
    out
}

fn format_patterns(records: &[ErrorMemoryRecord]) -> String {
    let headers: Vec<String> = ["kind", "tables", "seen", "fixed", "last seen"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.error_kind.to_string(),
                r.table_name.clone(),
                r.occurrence_count.to_string(),
                r.success_count.to_string(),
                r.last_seen.clone(),
            ]
        })
        .collect();
    format_table(&headers, &rows)
}

fn format_sandbox_result(result: &SandboxResult) -> String {
    let mut out = String::new();
    for warning in &result.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    if !result.stdout.is_empty() {
        out.push_str(&result.stdout);
        if !result.stdout.ends_with('\n') {
            out.push('\n');
        }
    }
    if result.success {
        let output = result.output.clone().unwrap_or(Value::Null);
        out.push_str(&format!(
            "result = {}\n",
            serde_json::to_string(&output).unwrap_or_default()
        ));
    } else {
        out.push_str(&format!(
            "error: {}\n",
            result.error.as_deref().unwrap_or("unknown failure")
        ));
    }
    out.push_str(&format!(
        "({:.3} s, {:.1} MB)",
        result.execution_time_s, result.memory_used_mb
    ));
    out
}

/// Formats a table as a string for display.
fn format_table(headers: &[String], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{cell:width$}")
            })
            .collect::<Vec<_>>()
            .join(" │ ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(headers)];
    lines.push(
        widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("─┼─"),
    );
    lines.extend(rows.iter().map(|row| render(row)));
    lines.join("\n")
}
