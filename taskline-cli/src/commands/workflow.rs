//! Workflow command handlers
//!
//! Saving and inspecting workflow definitions, the outputs a job can
//! publish, and the job audit trail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use taskline_client::OrchestratorClient;
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::workflow::WorkflowDefinition;

use super::colorize_status;
use crate::config::Config;

/// Workflow subcommands
#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Create or replace a workflow from a JSON definition file
    Apply {
        /// Path to the definition file
        file: PathBuf,
    },
    /// Print a workflow definition as JSON
    Get {
        name: String,

        /// Print the trigger-args template instead of the stored definition
        #[arg(long)]
        preset: bool,
    },
    /// List the output variables a job publishes
    Outputs {
        /// Workflow name
        name: String,
        /// Job name
        job: String,
    },
    /// List finished and running jobs, newest first
    History {
        /// Only jobs of this workflow
        #[arg(long)]
        workflow: Option<String>,
    },
}

/// Handle workflow commands
pub async fn handle_workflow_command(command: WorkflowCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        WorkflowCommands::Apply { file } => apply_workflow(&client, &file).await,
        WorkflowCommands::Get { name, preset } => get_workflow(&client, &name, preset).await,
        WorkflowCommands::Outputs { name, job } => list_outputs(&client, &name, &job).await,
        WorkflowCommands::History { workflow } => list_history(&client, workflow.as_deref()).await,
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid workflow definition in {}", path.display()))
}

async fn apply_workflow(client: &OrchestratorClient, path: &Path) -> Result<()> {
    let definition = load_definition(path)?;
    println!("{} {}", "Applying workflow".bold(), definition.name.cyan());

    let saved = client.save_workflow(&definition).await?;

    let jobs = saved.jobs().count();
    println!(
        "{} Workflow {} saved ({} stage(s), {} job(s))",
        "✓".green(),
        saved.name.bold(),
        saved.stages.len(),
        jobs
    );
    Ok(())
}

async fn get_workflow(client: &OrchestratorClient, name: &str, preset: bool) -> Result<()> {
    let definition = if preset {
        client.get_preset(name).await?
    } else {
        client.get_workflow(name).await?
    };
    println!("{}", serde_json::to_string_pretty(&definition)?);
    Ok(())
}

async fn list_outputs(client: &OrchestratorClient, name: &str, job: &str) -> Result<()> {
    let outputs = client.get_job_outputs(name, job).await?;

    if outputs.is_empty() {
        println!("{}", format!("Job {} publishes no outputs.", job).yellow());
        return Ok(());
    }

    println!("{}", format!("Outputs of {}/{}:", name, job).bold());
    for output in outputs {
        println!("  {} {}", "▸".cyan(), output);
    }
    Ok(())
}

async fn list_history(client: &OrchestratorClient, workflow: Option<&str>) -> Result<()> {
    let infos = client.list_job_infos(workflow).await?;

    if infos.is_empty() {
        println!("{}", "No jobs recorded.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", infos.len()).bold());
        println!();
        for info in infos {
            print_job_info(&info);
        }
    }
    Ok(())
}

fn print_job_info(info: &JobInfo) {
    println!(
        "  {} {}#{} {}",
        "▸".cyan(),
        info.workflow_name.bold(),
        info.task_id,
        info.job_name
    );
    println!("    Type:     {}", info.job_type);
    println!("    Status:   {}", colorize_status(info.status));
    if !info.service_name.is_empty() {
        println!(
            "    Service:  {}/{}",
            info.service_name, info.service_module
        );
    }
    if let Some(start) = info.start_time {
        println!(
            "    Started:  {}",
            start.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    if info.duration_secs > 0 {
        println!("    Duration: {}s", info.duration_secs);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_definition_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.json");
        std::fs::write(
            &path,
            r#"{"name": "deploy", "stages": [{"name": "build", "jobs": []}]}"#,
        )
        .unwrap();

        let definition = load_definition(&path).unwrap();
        assert_eq!(definition.name, "deploy");
        assert_eq!(definition.stages.len(), 1);
    }

    #[test]
    fn test_load_definition_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_definition(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid workflow definition"));
    }
}
