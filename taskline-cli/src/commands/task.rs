//! Task command handlers
//!
//! Triggering workflow tasks, inspecting and cancelling them, voting on
//! approval gates, resolving manual checks and reading job logs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Subcommand, ValueEnum};
use colored::*;
use taskline_client::OrchestratorClient;
use taskline_core::domain::log::LogEntry;
use taskline_core::domain::task::{JobTask, WorkflowTask};
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::task::{
    ApproveRequest, CreateTask, DecisionRequest, ManualDecision, TaskSummary,
};

use super::{colorize_status, parse_key_val, print_log_entry};
use crate::config::Config;

const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// Start a new task of a workflow
    Trigger {
        /// Workflow name
        workflow: String,

        /// Workflow inputs (can be specified multiple times)
        /// Format: -i key=value
        #[arg(short, long = "input", value_parser = parse_key_val)]
        inputs: Vec<(String, String)>,

        /// JSON file with per-job overrides, as printed by `workflow get --preset`
        #[arg(long)]
        args: Option<PathBuf>,

        #[arg(long, env = "TASKLINE_USER", default_value = "cli")]
        creator: String,
    },
    /// List tasks of a workflow, newest first
    List {
        workflow: String,

        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show a task with its stages and jobs
    Get { workflow: String, task_id: i64 },
    /// Cancel a running task
    Cancel { workflow: String, task_id: i64 },
    /// Vote on the workflow approval gate, or on an approval job with --job
    Approve {
        workflow: String,
        task_id: i64,

        /// Approval job to vote on
        #[arg(long)]
        job: Option<String>,

        /// Vote to reject instead of approve
        #[arg(long)]
        reject: bool,

        #[arg(long, default_value = "")]
        comment: String,

        #[arg(long, env = "TASKLINE_USER", default_value = "cli")]
        user: String,
    },
    /// Continue or abort a job waiting on a manual check
    Decide {
        workflow: String,
        task_id: i64,
        job: String,

        #[arg(value_enum)]
        decision: Decision,

        #[arg(long, env = "TASKLINE_USER", default_value = "cli")]
        user: String,
    },
    /// Print the logs of a job
    Logs {
        workflow: String,
        task_id: i64,
        job: String,

        /// Keep printing new lines until the job finishes
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Decision {
    Continue,
    Abort,
}

impl From<Decision> for ManualDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Continue => ManualDecision::Continue,
            Decision::Abort => ManualDecision::Abort,
        }
    }
}

/// Handle task commands
pub async fn handle_task_command(command: TaskCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        TaskCommands::Trigger {
            workflow,
            inputs,
            args,
            creator,
        } => trigger_task(&client, &workflow, inputs, args, creator).await,
        TaskCommands::List { workflow, limit } => list_tasks(&client, &workflow, limit).await,
        TaskCommands::Get { workflow, task_id } => get_task(&client, &workflow, task_id).await,
        TaskCommands::Cancel { workflow, task_id } => {
            client.cancel_task(&workflow, task_id).await?;
            println!("{} Task {}#{} cancelled", "✓".green(), workflow.bold(), task_id);
            Ok(())
        }
        TaskCommands::Approve {
            workflow,
            task_id,
            job,
            reject,
            comment,
            user,
        } => {
            let req = ApproveRequest {
                user,
                approve: !reject,
                comment,
            };
            approve(&client, &workflow, task_id, job.as_deref(), &req).await
        }
        TaskCommands::Decide {
            workflow,
            task_id,
            job,
            decision,
            user,
        } => {
            let req = DecisionRequest {
                user,
                decision: decision.into(),
            };
            client.decide_job(&workflow, task_id, &job, &req).await?;
            println!(
                "{} Decision {:?} recorded for {} of {}#{}",
                "✓".green(),
                decision,
                job.bold(),
                workflow,
                task_id
            );
            Ok(())
        }
        TaskCommands::Logs {
            workflow,
            task_id,
            job,
            follow,
        } => {
            if follow {
                follow_job_logs(&client, &workflow, task_id, &job).await
            } else {
                get_job_logs(&client, &workflow, task_id, &job).await
            }
        }
    }
}

async fn trigger_task(
    client: &OrchestratorClient,
    workflow: &str,
    inputs: Vec<(String, String)>,
    args: Option<PathBuf>,
    creator: String,
) -> Result<()> {
    let args = match args {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let args: WorkflowDefinition = serde_json::from_str(&content)
                .with_context(|| format!("Invalid trigger args in {}", path.display()))?;
            Some(args)
        }
        None => None,
    };

    let req = CreateTask {
        args,
        creator: Some(creator),
        inputs: inputs.into_iter().collect::<BTreeMap<_, _>>(),
    };

    println!("{} {}", "Triggering workflow".bold(), workflow.cyan());
    let created = client.create_task(workflow, req).await?;

    println!(
        "{} Task {}#{} created",
        "✓".green(),
        created.workflow_name.bold(),
        created.task_id
    );
    println!(
        "  {} taskline task get {} {}",
        "Inspect with:".dimmed(),
        created.workflow_name,
        created.task_id
    );
    Ok(())
}

async fn list_tasks(client: &OrchestratorClient, workflow: &str, limit: Option<i64>) -> Result<()> {
    let tasks = client.list_tasks(workflow, limit).await?;

    if tasks.is_empty() {
        println!("{}", format!("No tasks for {}.", workflow).yellow());
    } else {
        println!("{}", format!("Found {} task(s):", tasks.len()).bold());
        println!();
        for task in tasks {
            print_task_summary(&task);
        }
    }
    Ok(())
}

fn print_task_summary(task: &TaskSummary) {
    println!(
        "  {} {}#{}  {}",
        "▸".cyan(),
        task.workflow_name.bold(),
        task.task_id,
        colorize_status(task.status)
    );
    if !task.creator.is_empty() {
        println!("    Creator:  {}", task.creator);
    }
    println!(
        "    Created:  {}",
        task.create_time
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let (Some(start), Some(end)) = (task.start_time, task.end_time) {
        println!("    Duration: {}s", (end - start).num_seconds());
    }
    println!();
}

async fn get_task(client: &OrchestratorClient, workflow: &str, task_id: i64) -> Result<()> {
    let task = client.get_task(workflow, task_id).await?;
    print_task_details(&task);
    Ok(())
}

fn print_task_details(task: &WorkflowTask) {
    println!(
        "{} {}",
        format!("Task {}#{}", task.workflow_name, task.task_id).bold(),
        colorize_status(task.status)
    );
    if !task.creator.is_empty() {
        println!("  Creator: {}", task.creator);
    }
    if let Some(error) = &task.error {
        println!("  Error:   {}", error.red());
    }

    for stage in &task.stages {
        println!();
        println!("  {} {} {}", "▸".cyan(), stage.name.bold(), colorize_status(stage.status));
        for job in &stage.jobs {
            print_job_line(job);
        }
    }

    if !task.global_context.is_empty() {
        println!();
        println!("  {}", "Context:".bold());
        for (key, value) in &task.global_context {
            println!("    {} = {}", key, value);
        }
    }
}

fn print_job_line(job: &JobTask) {
    let duration = match (job.start_time, job.end_time) {
        (Some(start), Some(end)) => format!(" ({}s)", (end - start).num_seconds()),
        _ => String::new(),
    };
    println!(
        "      {:<24} {:<14} {}{}",
        job.name,
        job.job_type.to_string().dimmed(),
        colorize_status(job.status),
        duration.dimmed()
    );
    if let Some(error) = &job.error {
        println!("        {}", error.red());
    }
}

async fn approve(
    client: &OrchestratorClient,
    workflow: &str,
    task_id: i64,
    job: Option<&str>,
    req: &ApproveRequest,
) -> Result<()> {
    match job {
        Some(job) => client.approve_job(workflow, task_id, job, req).await?,
        None => client.approve_task(workflow, task_id, req).await?,
    }

    let vote = if req.approve {
        "approved".green()
    } else {
        "rejected".red()
    };
    let target = match job {
        Some(job) => format!("job {} of {}#{}", job, workflow, task_id),
        None => format!("{}#{}", workflow, task_id),
    };
    println!("{} {} {} as {}", "✓".green(), target.bold(), vote, req.user);
    Ok(())
}

async fn get_job_logs(
    client: &OrchestratorClient,
    workflow: &str,
    task_id: i64,
    job: &str,
) -> Result<()> {
    let logs = client.get_job_logs(workflow, task_id, job).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for {} of {}#{}:", job, workflow, task_id).bold());
        println!("{}", "─".repeat(80).dimmed());
        for log in &logs {
            print_log_entry(log);
        }
        println!("{}", "─".repeat(80).dimmed());
    }
    Ok(())
}

/// Entries not printed yet, given how many were printed before
fn unseen(logs: &[LogEntry], printed: usize) -> &[LogEntry] {
    logs.get(printed..).unwrap_or_default()
}

/// Polls the job log, printing new lines until the job reaches a final status
async fn follow_job_logs(
    client: &OrchestratorClient,
    workflow: &str,
    task_id: i64,
    job: &str,
) -> Result<()> {
    println!("{}", format!("Following {} of {}#{}:", job, workflow, task_id).bold());
    println!("{}", "─".repeat(80).dimmed());

    let mut printed = 0;
    loop {
        // Status first, so lines written just before the job finished are
        // still fetched below.
        let task = client.get_task(workflow, task_id).await?;
        let Some(status) = task.find_job(job).map(|job| job.status) else {
            bail!("Task {}#{} has no job {}", workflow, task_id, job);
        };

        let logs = client.get_job_logs(workflow, task_id, job).await?;
        for log in unseen(&logs, printed) {
            print_log_entry(log);
        }
        printed = printed.max(logs.len());

        if status.is_terminal() || task.status.is_terminal() {
            println!("{}", "─".repeat(80).dimmed());
            println!("Job finished: {}", colorize_status(status));
            return Ok(());
        }

        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::log::LogLevel;

    fn entries(count: usize) -> Vec<LogEntry> {
        (0..count)
            .map(|i| LogEntry::new(LogLevel::Info, format!("line {}", i)))
            .collect()
    }

    #[test]
    fn test_unseen_skips_printed_entries() {
        let logs = entries(5);
        let rest = unseen(&logs, 3);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].message, "line 3");
    }

    #[test]
    fn test_unseen_is_empty_when_caught_up() {
        let logs = entries(2);
        assert!(unseen(&logs, 2).is_empty());
        assert!(unseen(&logs, 7).is_empty());
    }

    #[test]
    fn test_decision_maps_to_manual_decision() {
        assert_eq!(ManualDecision::from(Decision::Continue), ManualDecision::Continue);
        assert_eq!(ManualDecision::from(Decision::Abort), ManualDecision::Abort);
    }
}
