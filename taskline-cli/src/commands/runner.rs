//! Runner command handlers
//!
//! Handles runner-related CLI commands: listing, inspecting and
//! deregistering runners.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use taskline_client::OrchestratorClient;
use taskline_core::domain::runner::{Runner, RunnerStatus};

use crate::config::Config;

/// Runner subcommands
#[derive(Subcommand)]
pub enum RunnerCommands {
    /// List all registered runners
    List,
    /// Show a single runner
    Get { id: String },
    /// Deregister a runner
    Delete { id: String },
}

/// Handle runner commands
///
/// Routes runner subcommands to their respective handlers.
pub async fn handle_runner_command(command: RunnerCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunnerCommands::List => list_runners(&client).await,
        RunnerCommands::Get { id } => {
            let runner = client.get_runner(&id).await?;
            print_runner_summary(&runner);
            Ok(())
        }
        RunnerCommands::Delete { id } => {
            client.delete_runner(&id).await?;
            println!("{} Runner {} removed", "✓".green(), id.bold());
            Ok(())
        }
    }
}

/// List all registered runners
async fn list_runners(client: &OrchestratorClient) -> Result<()> {
    let runners = client.list_runners().await?;

    if runners.is_empty() {
        println!("{}", "No runners registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered runner(s):", runners.len()).bold()
        );
        println!();
        for runner in runners {
            print_runner_summary(&runner);
        }
    }

    Ok(())
}

fn print_runner_summary(runner: &Runner) {
    let infrastructures = runner
        .infrastructures
        .iter()
        .map(|infra| infra.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    println!("  {} Runner {}", "▸".cyan(), runner.id.bold());
    println!("    Status:           {}", colorize_runner_status(runner.status));
    println!("    Infrastructures:  {}", infrastructures);
    println!(
        "    Registered:       {}",
        runner
            .registered_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!(
        "    Last Seen:        {}",
        runner
            .last_heartbeat_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn colorize_runner_status(status: RunnerStatus) -> ColoredString {
    match status {
        RunnerStatus::Online => status.as_str().green(),
        RunnerStatus::Offline => status.as_str().red(),
    }
}
