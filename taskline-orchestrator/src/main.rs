use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod cron;
pub mod db;
pub mod dispatch;
pub mod repository;
pub mod scheduler;
pub mod service;

use crate::catalog::CatalogReader;
use crate::compiler::{CompilerSettings, JobCompiler};
use crate::config::{Config, StoreBackend};
use crate::controller::{ControllerServices, Deployer, DisabledDeployer, HttpDeployer, MySqlConnector};
use crate::cron::CronScheduler;
use crate::dispatch::RunnerQueue;
use crate::repository::{
    Catalog, CronjobStore, JobInfoStore, LogStore, MemoryStore, MsgQueue, PgStore, RunnerStore,
    TaskStore, WorkflowStore,
};
use crate::scheduler::{CancelRegistry, DecisionBoard, TaskScheduler};
use crate::service::{
    CronjobService, LogService, NotifyService, RunnerService, WebhookNotifier, WorkflowTaskService,
};

const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Every store seam, backed by one implementation
struct Stores {
    workflows: Arc<dyn WorkflowStore>,
    tasks: Arc<dyn TaskStore>,
    cronjobs: Arc<dyn CronjobStore>,
    queue: Arc<dyn MsgQueue>,
    job_infos: Arc<dyn JobInfoStore>,
    logs: Arc<dyn LogStore>,
    runners: Arc<dyn RunnerStore>,
    catalog: Arc<dyn Catalog>,
}

impl Stores {
    fn backed_by<S>(store: Arc<S>) -> Self
    where
        S: WorkflowStore
            + TaskStore
            + CronjobStore
            + MsgQueue
            + JobInfoStore
            + LogStore
            + RunnerStore
            + Catalog
            + 'static,
    {
        Self {
            workflows: store.clone(),
            tasks: store.clone(),
            cronjobs: store.clone(),
            queue: store.clone(),
            job_infos: store.clone(),
            logs: store.clone(),
            runners: store.clone(),
            catalog: store,
        }
    }
}

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            Ok(Stores::backed_by(Arc::new(MemoryStore::new())))
        }
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;
            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Ok(Stores::backed_by(Arc::new(PgStore::new(pool))))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskline_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Taskline Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let stores = open_stores(&config).await?;

    let catalog = CatalogReader::new(stores.catalog.clone());
    let logs = LogService::new(stores.logs.clone());
    let queue = Arc::new(RunnerQueue::new());
    let decisions = DecisionBoard::new();

    let deployer: Arc<dyn Deployer> = match &config.deploy_webhook_url {
        Some(url) => Arc::new(HttpDeployer::new(url.clone())),
        None => Arc::new(DisabledDeployer),
    };

    let notify = NotifyService::new(
        Arc::new(WebhookNotifier::new(config.notify_webhook_url.clone())),
        stores.tasks.clone(),
    );

    let services = Arc::new(ControllerServices {
        catalog: catalog.clone(),
        job_infos: stores.job_infos.clone(),
        logs: logs.clone(),
        dispatcher: queue.clone(),
        sql: Arc::new(MySqlConnector),
        deployer,
        decisions: decisions.clone(),
        notify: notify.clone(),
        dispatch_grace: config.dispatch_grace,
        deploy_poll_interval: DEPLOY_POLL_INTERVAL,
    });

    let scheduler = Arc::new(TaskScheduler::new(
        services,
        stores.tasks.clone(),
        CancelRegistry::new(),
        notify,
        config.cancel_grace,
    ));

    let compiler = JobCompiler::new(
        catalog,
        CompilerSettings {
            system_address: config.system_address.clone(),
        },
    );
    let cronjobs = CronjobService::new(stores.cronjobs.clone(), stores.queue.clone());
    let workflows = WorkflowTaskService::new(
        stores.workflows.clone(),
        stores.tasks.clone(),
        compiler,
        cronjobs,
        scheduler,
        decisions,
    );

    let recovered = workflows
        .recover_unfinished()
        .await
        .context("Failed to recover unfinished tasks")?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted task(s) as failed", recovered);
    }

    let shutdown = CancellationToken::new();

    let cron = CronScheduler::new(
        stores.cronjobs.clone(),
        stores.queue.clone(),
        Arc::new(workflows.clone()),
        config.cron_tick,
        config.msg_queue_poll,
    );
    tokio::spawn(cron.run(shutdown.clone()));

    let runners = RunnerService::new(stores.runners.clone());
    tokio::spawn(
        runners
            .clone()
            .run_stale_sweeper(config.runner_stale, shutdown.clone()),
    );

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        workflows,
        runners,
        logs,
        queue,
        job_infos: stores.job_infos,
        catalog: stores.catalog,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("Failed to start server")?;

    shutdown.cancel();
    Ok(())
}
