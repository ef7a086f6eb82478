//! Taskline CLI
//!
//! Command-line interface for interacting with the Taskline orchestrator.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "taskline")]
#[command(about = "Taskline CI/CD workflow CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "TASKLINE_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::new(cli.orchestrator_url);

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_nested_task_command() {
        let cli = Cli::try_parse_from([
            "taskline",
            "--orchestrator-url",
            "http://ci:9000",
            "task",
            "trigger",
            "deploy",
            "-i",
            "env=prod",
        ])
        .unwrap();

        assert_eq!(cli.orchestrator_url, "http://ci:9000");
        assert!(matches!(cli.command, Commands::Task { .. }));
    }
}
