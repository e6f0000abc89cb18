//! sqlmend command-line entry point.

use std::process::ExitCode;

use sqlmend::cli::Cli;
use sqlmend::{app, logging};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match &cli.log_file {
        Some(path) => logging::init_file_logging(path.clone()),
        None => logging::init_stderr_logging(),
    }

    match app::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
