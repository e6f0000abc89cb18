//! Command-line argument parsing for sqlmend.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::llm::LlmProvider;

/// Natural-language questions answered with validated, self-repairing SQL.
#[derive(Parser, Debug)]
#[command(name = "sqlmend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs to a file instead of stderr (default location if no path is given)
    #[arg(long, global = true, value_name = "PATH", num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a question against the configured database
    Ask(AskArgs),

    /// Check whether SQL passes the safety validator
    Validate {
        /// SQL to check
        sql: String,
    },

    /// Run analysis code in the sandbox
    Sandbox(SandboxArgs),

    /// List the most frequent error patterns for a tenant
    Memory {
        /// Tenant whose patterns to list
        #[arg(long, default_value = "default")]
        tenant: String,

        /// Maximum number of patterns
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question, in plain language
    pub question: String,

    /// Tenant the error memory is scoped to
    #[arg(long, default_value = "default")]
    pub tenant: String,

    /// Database URL (postgres://... or sqlite:...)
    #[arg(long, env = "SQLMEND_DATABASE_URL", value_name = "URL")]
    pub database: Option<String>,

    /// LLM provider (openai, anthropic, ollama)
    #[arg(long, value_name = "PROVIDER")]
    pub llm: Option<LlmProvider>,

    /// Most candidates to try before giving up
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// JSON file with variables for analysis code
    #[arg(long, value_name = "PATH")]
    pub context: Option<PathBuf>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct SandboxArgs {
    /// File with the code to run ("-" for stdin)
    pub file: PathBuf,

    /// Wall-clock limit in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Memory ceiling in megabytes
    #[arg(long, value_name = "MB")]
    pub memory_mb: Option<u64>,

    /// JSON file with variables for the code
    #[arg(long, value_name = "PATH")]
    pub context: Option<PathBuf>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }
}
