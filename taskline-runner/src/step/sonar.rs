//! Sonar quality gate and metrics steps
//!
//! Both read the scanner's `report-task.txt` to find the compute-engine task
//! of the analysis that just ran, wait for it, then query the server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use taskline_core::domain::step::{StepSonarCheckSpec, StepSonarGetMetricsSpec, StepTask};

use super::{StepError, StepExecutor};
use crate::context::JobContext;

const DEFAULT_WORK_DIR: &str = ".scannerwork";
const REPORT_FILE: &str = "report-task.txt";
const DEFAULT_WAIT_MINUTES: u64 = 10;
const CE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const METRIC_KEYS: &str = "ncloc,bugs,vulnerabilities,code_smells,coverage,duplicated_lines_density";

#[derive(Debug, Deserialize)]
struct CeTaskResponse {
    task: CeTask,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CeTask {
    status: String,
    #[serde(default)]
    analysis_id: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateResponse {
    project_status: ProjectStatus,
}

#[derive(Debug, Deserialize)]
struct ProjectStatus {
    status: String,
    #[serde(default)]
    conditions: Vec<GateCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateCondition {
    status: String,
    metric_key: String,
    #[serde(default)]
    comparator: String,
    #[serde(default)]
    error_threshold: String,
    #[serde(default)]
    actual_value: String,
}

#[derive(Debug, Deserialize)]
struct MeasuresResponse {
    component: Component,
}

#[derive(Debug, Deserialize)]
struct Component {
    #[serde(default)]
    measures: Vec<Measure>,
}

#[derive(Debug, Deserialize)]
struct Measure {
    metric: String,
    #[serde(default)]
    value: String,
}

/// `sonar.working.directory` from scanner parameters (`key=value` per line)
fn work_dir_parameter(parameter: &str) -> Option<&str> {
    parameter
        .lines()
        .map(str::trim)
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "sonar.working.directory")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn report_path(ctx: &JobContext, check_dir: &str, parameter: &str) -> PathBuf {
    let work_dir = work_dir_parameter(parameter).unwrap_or(DEFAULT_WORK_DIR);
    let work_dir = ctx.expand(work_dir);
    let work_dir = if Path::new(&work_dir).is_absolute() {
        PathBuf::from(work_dir)
    } else {
        ctx.resolve(check_dir).join(work_dir)
    };
    work_dir.join(REPORT_FILE)
}

fn ce_task_id(report: &str) -> Option<&str> {
    report
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "ceTaskId")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// OK and NONE (no gate configured) pass; WARN and ERROR fail
fn gate_passed(status: &str) -> bool {
    matches!(status, "OK" | "NONE")
}

struct SonarClient<'a> {
    http: &'a reqwest::Client,
    server: String,
    token: &'a str,
}

impl<'a> SonarClient<'a> {
    fn new(http: &'a reqwest::Client, server: &str, token: &'a str) -> Self {
        Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StepError> {
        let response = self
            .http
            .get(format!("{}{}", self.server, path))
            .basic_auth(self.token, Some(""))
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn poll_analysis(&self, task_id: &str) -> Result<String, StepError> {
        loop {
            let response: CeTaskResponse = self.get("/api/ce/task", &[("id", task_id)]).await?;
            let task = response.task;
            match task.status.as_str() {
                "SUCCESS" => {
                    return task
                        .analysis_id
                        .ok_or_else(|| StepError::Check("analysis id missing".to_string()));
                }
                "FAILED" | "CANCELED" => {
                    return Err(StepError::Check(format!(
                        "sonar analysis {}: {}",
                        task.status.to_lowercase(),
                        task.error_message.unwrap_or_default()
                    )));
                }
                _ => tokio::time::sleep(CE_POLL_INTERVAL).await,
            }
        }
    }

    /// Waits for the compute-engine task and returns its analysis id
    async fn wait_for_analysis(&self, task_id: &str, wait: Duration) -> Result<String, StepError> {
        tokio::time::timeout(wait, self.poll_analysis(task_id))
            .await
            .map_err(|_| StepError::Check(format!("sonar analysis {} did not finish in time", task_id)))?
    }
}

async fn read_task_id(report: &Path) -> Result<String, StepError> {
    let content = tokio::fs::read_to_string(report).await.map_err(|e| {
        StepError::Check(format!("read sonar task report {}: {}", report.display(), e))
    })?;
    ce_task_id(&content)
        .map(str::to_string)
        .ok_or_else(|| StepError::Check(format!("no ceTaskId in {}", report.display())))
}

// =============================================================================
// Quality gate
// =============================================================================

pub struct SonarCheckExecutor {
    spec: StepSonarCheckSpec,
}

impl SonarCheckExecutor {
    pub fn new(spec: StepSonarCheckSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl StepExecutor for SonarCheckExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        if self.spec.sonar_server.is_empty() {
            return Err(StepError::invalid("sonar server address is empty"));
        }
        ctx.step_info(&step.name, "Checking Sonar quality gate status");

        let report = report_path(ctx, &self.spec.check_dir, &self.spec.parameter);
        let task_id = read_task_id(&report).await?;
        let minutes = if self.spec.wait_timeout == 0 {
            DEFAULT_WAIT_MINUTES
        } else {
            self.spec.wait_timeout
        };

        let client = SonarClient::new(&ctx.http, &self.spec.sonar_server, &self.spec.sonar_token);
        let analysis_id = client
            .wait_for_analysis(&task_id, Duration::from_secs(minutes * 60))
            .await?;
        let gate: GateResponse = client
            .get("/api/qualitygates/project_status", &[("analysisId", analysis_id.as_str())])
            .await?;

        let status = gate.project_status;
        ctx.step_info(&step.name, format!("Sonar quality gate status: {}", status.status));
        for condition in &status.conditions {
            ctx.step_info(
                &step.name,
                format!(
                    "{:<32} {:<6} {:>4} {:>10} actual {}",
                    condition.metric_key,
                    condition.status,
                    condition.comparator,
                    condition.error_threshold,
                    condition.actual_value
                ),
            );
        }

        if gate_passed(&status.status) {
            Ok(())
        } else {
            Err(StepError::Check(format!(
                "sonar quality gate status was: {}",
                status.status
            )))
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Fetches project measures and publishes each as `SONAR_<METRIC>` output file
pub struct SonarMetricsExecutor {
    spec: StepSonarGetMetricsSpec,
}

impl SonarMetricsExecutor {
    pub fn new(spec: StepSonarGetMetricsSpec) -> Self {
        Self { spec }
    }
}

pub(crate) fn metric_output_name(metric: &str) -> String {
    format!("SONAR_{}", metric.to_uppercase())
}

#[async_trait]
impl StepExecutor for SonarMetricsExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        if self.spec.sonar_server.is_empty() {
            return Err(StepError::invalid("sonar server address is empty"));
        }
        let client = SonarClient::new(&ctx.http, &self.spec.sonar_server, &self.spec.sonar_token);

        // Metrics are only current once the analysis that just ran is processed
        let report = report_path(ctx, &self.spec.check_dir, "");
        if tokio::fs::try_exists(&report).await? {
            let task_id = read_task_id(&report).await?;
            client
                .wait_for_analysis(&task_id, Duration::from_secs(DEFAULT_WAIT_MINUTES * 60))
                .await?;
        }

        let mut query = vec![
            ("component", self.spec.project_key.as_str()),
            ("metricKeys", METRIC_KEYS),
        ];
        if !self.spec.branch.is_empty() {
            query.push(("branch", self.spec.branch.as_str()));
        }
        let measures: MeasuresResponse = client.get("/api/measures/component", &query).await?;

        let mut summary = BTreeMap::new();
        for measure in &measures.component.measures {
            ctx.step_info(&step.name, format!("{}: {}", measure.metric, measure.value));
            tokio::fs::write(
                ctx.outputs_dir.join(metric_output_name(&measure.metric)),
                &measure.value,
            )
            .await?;
            summary.insert(measure.metric.as_str(), measure.value.as_str());
        }

        let summary = serde_json::to_string(&summary)
            .map_err(|e| StepError::Check(format!("failed to encode metrics: {}", e)))?;
        tokio::fs::write(ctx.outputs_dir.join("SONAR_METRICS"), summary).await?;
        tokio::fs::write(ctx.outputs_dir.join("SONAR_PROJECT_KEY"), &self.spec.project_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use taskline_core::domain::step::StepSpec;

    #[test]
    fn test_work_dir_parameter() {
        let parameter = "sonar.projectKey=api\nsonar.working.directory = build/sonar\n";
        assert_eq!(work_dir_parameter(parameter), Some("build/sonar"));
        assert_eq!(work_dir_parameter("sonar.projectKey=api"), None);
    }

    #[test]
    fn test_ce_task_id_from_report() {
        let report = "projectKey=api\nserverUrl=http://sonar\nceTaskId=AYx1\n";
        assert_eq!(ce_task_id(report), Some("AYx1"));
        assert_eq!(ce_task_id("projectKey=api"), None);
    }

    #[test]
    fn test_gate_statuses() {
        assert!(gate_passed("OK"));
        assert!(gate_passed("NONE"));
        assert!(!gate_passed("WARN"));
        assert!(!gate_passed("ERROR"));
    }

    #[test]
    fn test_response_shapes() {
        let gate: GateResponse = serde_json::from_value(serde_json::json!({
            "projectStatus": {
                "status": "ERROR",
                "conditions": [{
                    "status": "ERROR",
                    "metricKey": "new_coverage",
                    "comparator": "LT",
                    "errorThreshold": "80",
                    "actualValue": "41.2"
                }]
            }
        }))
        .unwrap();
        assert_eq!(gate.project_status.conditions[0].metric_key, "new_coverage");

        let task: CeTaskResponse = serde_json::from_value(serde_json::json!({
            "task": { "status": "SUCCESS", "analysisId": "A1" }
        }))
        .unwrap();
        assert_eq!(task.task.analysis_id.as_deref(), Some("A1"));
        assert_eq!(metric_output_name("code_smells"), "SONAR_CODE_SMELLS");
    }

    #[tokio::test]
    async fn test_report_path_honors_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;

        assert_eq!(
            report_path(&ctx, "api", ""),
            ctx.workspace.join("api/.scannerwork/report-task.txt")
        );
        assert_eq!(
            report_path(&ctx, "api", "sonar.working.directory=/tmp/sw"),
            PathBuf::from("/tmp/sw/report-task.txt")
        );
    }

    #[tokio::test]
    async fn test_check_fails_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let spec = StepSonarCheckSpec {
            sonar_server: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let step = StepTask::new("sonar", StepSpec::SonarCheck(spec.clone()));

        let err = SonarCheckExecutor::new(spec).run(&step, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("report-task.txt"));
    }
}
