//! CLI command definitions for agent-queue
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod add;
pub mod doctor;

use add::AddArgs;
use clap::{Args, Parser, Subcommand};
use doctor::DoctorArgs;

/// Local task queue runner for code-generation CLIs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default config file and create the database
    Init(InitArgs),

    /// Enqueue a task
    Add(AddArgs),

    /// List tasks
    List(ListArgs),

    /// Run workers against the queue
    Run(RunArgs),

    /// Show a task with its status history
    Show(ShowArgs),

    /// Cancel a task that has not started
    Cancel(CancelArgs),

    /// Check the environment, locks and orphaned tasks
    Doctor(DoctorArgs),
}

/// Arguments for the init subcommand
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the list subcommand
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only tasks in these statuses (repeatable or comma-separated)
    #[arg(short, long, value_name = "STATUS", value_delimiter = ',')]
    pub status: Vec<String>,

    /// Only tasks for this repository
    #[arg(long, value_name = "PATH")]
    pub repo: Option<String>,

    /// Only follow-ups created by this task
    #[arg(long, value_name = "ID")]
    pub parent: Option<i64>,

    /// Only tasks in this chain group
    #[arg(long, value_name = "GROUP")]
    pub chain_group: Option<String>,

    /// Maximum number of tasks
    #[arg(long)]
    pub limit: Option<i64>,

    /// Output format: markdown or json (default from config)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for the run subcommand
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of workers (default from config)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Exit once nothing is selectable and nothing is running
    #[arg(long)]
    pub until_empty: bool,
}

/// Arguments for the show subcommand
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Task id
    pub id: i64,

    /// Output format: markdown or json (default from config)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for the cancel subcommand
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Task id
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["agent-queue", "list", "--status", "queued,failed", "-d", "q.db"]);
        assert_eq!(cli.database.as_deref(), Some("q.db"));
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.status, vec!["queued", "failed"]);
    }

    #[test]
    fn parses_chain_group_filter() {
        let cli = Cli::parse_from(["agent-queue", "list", "--chain-group", "group-1"]);
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.chain_group.as_deref(), Some("group-1"));
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from(["agent-queue", "run", "--workers", "4", "--until-empty"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workers, Some(4));
        assert!(args.until_empty);
    }

    #[test]
    fn log_defaults_to_stderr() {
        let cli = Cli::parse_from(["agent-queue", "cancel", "7"]);
        assert_eq!(cli.log, "2");
        assert!(matches!(cli.command, Command::Cancel(CancelArgs { id: 7 })));
    }
}
