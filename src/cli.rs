use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ElasticBLAST: distributed BLAST searches on cloud compute clusters",
    long_about = "ElasticBLAST distributes a BLAST search across an auto-scaling cloud\n\
                  cluster: it provisions the cluster, splits the query into batches,\n\
                  schedules one job per batch, monitors progress, collects results to\n\
                  cloud object storage, and tears everything down.\n\n\
                  Examples:\n  \
                  elastic-blast submit --cfg search.ini\n  \
                  elastic-blast status --cfg search.ini --wait\n  \
                  elastic-blast delete --cfg search.ini"
)]
pub struct Cli {
    /// Configuration file describing the search
    #[arg(long, global = true, value_name = "PATH")]
    pub cfg: Option<PathBuf>,

    /// Show what would be done without creating any cloud resources
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log destination; a path or "stderr"
    #[arg(long, global = true, default_value = "stderr", value_name = "PATH")]
    pub logfile: String,

    /// Logging verbosity
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub loglevel: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit an ElasticBLAST search
    Submit {},
    /// Get the status of an ElasticBLAST search
    Status {
        /// Wait for the search to reach a terminal state
        #[arg(long)]
        wait: bool,
        /// Detailed information about jobs
        #[arg(long)]
        verbose: bool,
        /// Return the search status through the exit code
        #[arg(long)]
        exit_code: bool,
    },
    /// Delete the cloud resources of an ElasticBLAST search
    Delete {},
    /// Produce a JSON report about an ElasticBLAST search
    RunSummary {
        /// Write the report to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        out: Option<String>,
    },
    /// Run one cleanup sweep; normally invoked by the cloud scheduler
    #[command(hide = true)]
    Janitor {},
}
