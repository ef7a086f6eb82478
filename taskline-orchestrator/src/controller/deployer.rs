//! Deploy backends
//!
//! The orchestrator does not talk to clusters itself. A `Deployer` rolls
//! images out and reports readiness; `HttpDeployer` forwards both to a
//! deploy webhook.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ControllerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub workflow_name: String,
    pub task_id: i64,
    pub env: String,
    pub namespace: String,
    pub cluster_id: String,
    pub production: bool,
    pub service_name: String,
    /// Image per service module
    pub images: BTreeMap<String, String>,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, req: &DeployRequest) -> Result<(), ControllerError>;
    /// Whether every module of the service runs the requested image
    async fn is_ready(&self, req: &DeployRequest) -> Result<bool, ControllerError>;
}

#[derive(Debug, Deserialize)]
struct ReadyResponse {
    ready: bool,
}

pub struct HttpDeployer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeployer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Deployer for HttpDeployer {
    async fn deploy(&self, req: &DeployRequest) -> Result<(), ControllerError> {
        let url = format!("{}/deploy", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| ControllerError::Deploy(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Deploy(format!("{}: {}", status, body)));
        }
        Ok(())
    }

    async fn is_ready(&self, req: &DeployRequest) -> Result<bool, ControllerError> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| ControllerError::Deploy(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControllerError::Deploy(e.to_string()))?;
        let ready: ReadyResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::Deploy(e.to_string()))?;
        Ok(ready.ready)
    }
}

/// Used when no deploy webhook is configured; every deploy fails
pub struct DisabledDeployer;

#[async_trait]
impl Deployer for DisabledDeployer {
    async fn deploy(&self, _req: &DeployRequest) -> Result<(), ControllerError> {
        Err(ControllerError::Deploy("no deploy backend configured".to_string()))
    }

    async fn is_ready(&self, _req: &DeployRequest) -> Result<bool, ControllerError> {
        Ok(false)
    }
}
