//! Commands module
//!
//! Defines all CLI commands, their handlers and the display helpers they
//! share.

mod runner;
mod task;
mod workflow;

pub use runner::RunnerCommands;
pub use task::TaskCommands;
pub use workflow::WorkflowCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use taskline_core::domain::log::{LogEntry, LogLevel};
use taskline_core::domain::status::Status;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Workflow definitions
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Workflow tasks: trigger, inspect, approve and follow logs
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Runner management
    Runner {
        #[command(subcommand)]
        command: RunnerCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Workflow { command } => workflow::handle_workflow_command(command, config).await,
        Commands::Task { command } => task::handle_task_command(command, config).await,
        Commands::Runner { command } => runner::handle_runner_command(command, config).await,
    }
}

/// Parse a `KEY=VALUE` argument
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

pub(crate) fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    match &log.step {
        Some(step) => println!(
            "{} [{}] {} {}",
            log.timestamp.format("%H:%M:%S").to_string().dimmed(),
            level_colored,
            format!("({})", step).dimmed(),
            log.message
        ),
        None => println!(
            "{} [{}] {}",
            log.timestamp.format("%H:%M:%S").to_string().dimmed(),
            level_colored,
            log.message
        ),
    }
}

/// Colorize a task, stage or job status for display
pub(crate) fn colorize_status(status: Status) -> ColoredString {
    let status_str = status.to_string();
    match status {
        Status::Created | Status::Prepare => status_str.dimmed(),
        Status::WaitingApprove | Status::ManualCheck => status_str.yellow(),
        Status::Running => status_str.cyan(),
        Status::Passed => status_str.green(),
        Status::Failed | Status::Timeout | Status::Rejected => status_str.red(),
        Status::Cancelled | Status::Skipped => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("env=prod").unwrap(),
            ("env".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_val("flags=a=b").unwrap(),
            ("flags".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_val("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
    }

    #[test]
    fn test_parse_key_val_rejects_malformed() {
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=value").is_err());
    }
}
