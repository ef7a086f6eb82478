//! Taskline HTTP Client
//!
//! A type-safe HTTP client for the Taskline orchestrator API, shared by the
//! runner (dispatch traffic) and the CLI (workflows, tasks, logs).
//!
//! # Example
//!
//! ```no_run
//! use taskline_client::OrchestratorClient;
//! use taskline_core::dto::task::CreateTask;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let created = client.create_task("release", CreateTask::default()).await?;
//!     println!("Started {}#{}", created.workflow_name, created.task_id);
//!     Ok(())
//! }
//! ```

mod dispatch;
pub mod error;
mod runners;
mod workflows;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Header runners identify themselves with on dispatch reports
pub const RUNNER_ID_HEADER: &str = "x-runner-id";

/// HTTP client for the Taskline orchestrator API
///
/// Endpoints are grouped by submodule:
/// - Workflow definitions, tasks, approvals and job logs
/// - Runner registration and heartbeats
/// - Dispatch: claiming jobs and reporting their progress
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
    /// Sent on dispatch reports when set
    runner_id: Option<String>,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            runner_id: None,
        }
    }

    /// Identifies dispatch reports as coming from this runner
    pub fn with_runner_id(mut self, runner_id: impl Into<String>) -> Self {
        self.runner_id = Some(runner_id.into());
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!(status = status.as_u16(), "orchestrator returned an error: {}", body);
        Err(ClientError::api_error(status.as_u16(), body))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check(response).await.map(|_| ())
    }
}

/// Percent-encodes a path segment
pub(crate) fn segment(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_runner_id_is_optional() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert!(client.runner_id.is_none());
        let client = client.with_runner_id("vm-1");
        assert_eq!(client.runner_id.as_deref(), Some("vm-1"));
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(segment("release-1.2"), "release-1.2");
        assert_eq!(segment("my job"), "my%20job");
        assert_eq!(segment("a/b"), "a%2Fb");
    }
}
