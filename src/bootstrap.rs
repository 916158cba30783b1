//! Process wiring: builds the store, queue, executor and dispatch policy from
//! configuration. `main` owns the result and decides what to run.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::analysis::{inference::engine_from_config, AnalysisExecutor, FileTextExtractor};
use crate::config::Config;
use crate::db::{create_pool, run_migrations, JobStore, MemoryJobStore, PgJobStore};
use crate::dispatch::{DispatchMode, DispatchPolicy};
use crate::models::AppState;
use crate::queue::{JobQueue, RedisQueue, Worker};

pub struct Services {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<AnalysisExecutor>,
    pub policy: Arc<DispatchPolicy>,
}

impl Services {
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let store = connect_store(&config).await?;
        let queue = connect_queue(&config).await;
        let policy = Arc::new(DispatchPolicy::resolve(config.redis.enabled, queue).await);

        let engine = engine_from_config(&config.llm)?;
        let executor = Arc::new(AnalysisExecutor::new(
            Arc::new(FileTextExtractor::new()),
            engine,
            config.analysis.timeout(),
        ));

        info!(
            store = store.backend(),
            mode = policy.decide().as_str(),
            timeout_secs = config.analysis.timeout_secs,
            "Services initialized"
        );

        Ok(Self {
            config,
            store,
            executor,
            policy,
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.policy.decide()
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.config.clone(),
            self.store.clone(),
            self.executor.clone(),
            self.policy.clone(),
        )
    }

    /// A worker for the queue in use, or `None` in inline mode.
    pub fn worker(&self) -> Option<Worker> {
        let queue = self.policy.queue()?.clone();
        Some(
            Worker::new(
                self.store.clone(),
                queue,
                self.executor.clone(),
                self.config.analysis.worker_poll_interval(),
            )
            .with_lease(self.config.analysis.worker_lease()),
        )
    }
}

async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryJobStore::new()));
    };

    let pool = create_pool(&config.database, url)
        .await
        .context("Failed to connect to database")?;

    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Database migrations completed");

    Ok(Arc::new(PgJobStore::new(pool)))
}

/// Connection failures are not fatal: the dispatch policy falls back to
/// inline mode.
async fn connect_queue(config: &Config) -> Option<Arc<dyn JobQueue>> {
    if !config.redis.enabled {
        return None;
    }

    match RedisQueue::connect(&config.redis.url, &config.redis.queue_name).await {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis");
            None
        }
    }
}
