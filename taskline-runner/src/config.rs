//! Runner configuration
//!
//! Defines all configurable parameters for the runner including
//! polling intervals, log shipping, local directories and the
//! infrastructures this runner accepts jobs for.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use taskline_core::domain::common::Infrastructure;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to ask the orchestrator for a queued job
    pub poll_interval: Duration,

    /// How often to send buffered logs to the orchestrator
    pub log_send_interval: Duration,

    /// Buffered entries that trigger a send before the interval elapses
    pub log_buffer_size: usize,

    /// Max parallel jobs the runner can handle
    pub max_parallel_jobs: usize,

    /// Each job gets `<workspace_base>/<dispatch id>`
    pub workspace_base: PathBuf,

    /// Root directory of the local object store
    pub object_store_root: PathBuf,

    /// Infrastructures this runner claims jobs for
    pub infrastructures: Vec<Infrastructure>,

    pub heartbeat_interval: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        let base = std::env::temp_dir().join("taskline");
        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(5),
            log_send_interval: Duration::from_secs(2),
            log_buffer_size: 100,
            max_parallel_jobs: 2,
            workspace_base: base.join("workspaces"),
            object_store_root: base.join("objects"),
            infrastructures: vec![Infrastructure::Vm],
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - LOG_SEND_INTERVAL (optional, seconds, default: 2)
    /// - LOG_BUFFER_SIZE (optional, default: 100)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - WORKSPACE_BASE (optional, default: $TMPDIR/taskline/workspaces)
    /// - OBJECT_STORE_ROOT (optional, default: $TMPDIR/taskline/objects)
    /// - RUNNER_INFRASTRUCTURES (optional, comma list, default: vm)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id = std::env::var("RUNNER_ID")
            .map_err(|_| anyhow::anyhow!("RUNNER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(runner_id, orchestrator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LOG_SEND_INTERVAL") {
            config.log_send_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("LOG_BUFFER_SIZE") {
            config.log_buffer_size = size;
        }
        if let Some(jobs) = env_parse::<usize>("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = jobs;
        }
        if let Ok(dir) = std::env::var("WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("OBJECT_STORE_ROOT") {
            config.object_store_root = PathBuf::from(dir);
        }
        if let Ok(list) = std::env::var("RUNNER_INFRASTRUCTURES") {
            config.infrastructures = parse_infrastructures(&list).map_err(|e| anyhow::anyhow!(e))?;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_send_interval.as_secs() == 0 {
            anyhow::bail!("log_send_interval must be greater than 0");
        }

        if self.log_buffer_size == 0 {
            anyhow::bail!("log_buffer_size must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.infrastructures.is_empty() {
            anyhow::bail!("runner must accept at least one infrastructure");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Parses `vm,kubernetes`; duplicates are dropped
pub fn parse_infrastructures(list: &str) -> Result<Vec<Infrastructure>, String> {
    let mut infrastructures = Vec::new();
    for item in list.split(',').filter(|s| !s.trim().is_empty()) {
        let infrastructure = Infrastructure::from_str(item)?;
        if !infrastructures.contains(&infrastructure) {
            infrastructures.push(infrastructure);
        }
    }
    Ok(infrastructures)
}
