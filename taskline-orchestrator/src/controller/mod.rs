//! Controllers
//!
//! The orchestrator's half of job execution. Step controllers validate and
//! complete a step right before dispatch (`pre_run`) and publish what it
//! produced afterwards (`after_run`). Job controllers drive one job task
//! to a terminal status: freestyle jobs through the runner pool, SQL,
//! deploy and approval jobs in process.

pub mod deployer;
#[cfg(test)]
pub(crate) mod fakes;
pub mod job;
pub mod sql;
pub mod step;

use std::sync::Arc;
use std::time::Duration;

use taskline_core::output::TemplateError;

use crate::catalog::CatalogReader;
use crate::dispatch::{DispatchError, JobDispatcher};
use crate::repository::{JobInfoStore, StoreError};
use crate::scheduler::DecisionBoard;
use crate::service::log::LogService;
use crate::service::notify::NotifyService;

pub use deployer::{DeployRequest, Deployer, DisabledDeployer, HttpDeployer};
pub use sql::{MySqlConnector, SqlConnector, SqlSession};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    Invalid(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("invalid db type")]
    InvalidDbType,

    #[error("failed to connect to database: {0}")]
    Connect(String),

    #[error("deploy failed: {0}")]
    Deploy(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to render job spec: {0}")]
    Render(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControllerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ControllerError::Invalid(message.into())
    }
}

/// Collaborators every job controller may reach for
pub struct ControllerServices {
    pub catalog: CatalogReader,
    pub job_infos: Arc<dyn JobInfoStore>,
    pub logs: LogService,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub sql: Arc<dyn SqlConnector>,
    pub deployer: Arc<dyn Deployer>,
    pub decisions: DecisionBoard,
    pub notify: NotifyService,
    /// Extra time a dispatched job gets past its timeout before it is
    /// considered lost
    pub dispatch_grace: Duration,
    pub deploy_poll_interval: Duration,
}
