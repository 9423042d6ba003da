use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AppConfig, Capabilities};
use crate::db::{self, PgStore, StoreHandle};
use crate::jobs::retry::{RetentionPolicy, RetryPolicy};
use crate::models::render_config::{RenderConfig, RenderConfigError};
use crate::services::digitizer::{Digitizer, SubprocessDigitizer};
use crate::services::queue::{JobsHandle, QueueError, RedisQueue};

/// Shared handles passed to route handlers and stage runners.
///
/// Built once per process; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobsHandle,
    pub store: StoreHandle,
    pub digitizer: Arc<dyn Digitizer>,
    pub render_config: Arc<RenderConfig>,
    pub asset_dir: PathBuf,
    pub retry: RetryPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0} is required unless its capability is disabled")]
    MissingSetting(&'static str),

    #[error("database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    RenderConfig(#[from] RenderConfigError),

    #[error("asset directory setup failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AppState {
    pub fn new(
        jobs: JobsHandle,
        store: StoreHandle,
        digitizer: Arc<dyn Digitizer>,
        render_config: RenderConfig,
        asset_dir: PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            store,
            digitizer,
            render_config: Arc::new(render_config),
            asset_dir,
            retry,
        }
    }

    /// Resolve capabilities and connect whatever they enable.
    pub async fn from_config(config: &AppConfig, migrate: bool) -> Result<Self, StartupError> {
        let capabilities = Capabilities::resolve(config);
        tracing::info!(jobs = capabilities.jobs, db = capabilities.db, "Resolved capabilities");

        let store = if capabilities.db {
            let url = config
                .database_url
                .as_deref()
                .ok_or(StartupError::MissingSetting("DATABASE_URL"))?;
            tracing::info!("Connecting to PostgreSQL");
            let pool = db::init_pool(url).await?;
            if migrate {
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
            }
            StoreHandle::Enabled(Arc::new(PgStore::new(pool)))
        } else {
            StoreHandle::Disabled
        };

        let jobs = if capabilities.jobs {
            let url = config
                .redis_url
                .as_deref()
                .ok_or(StartupError::MissingSetting("REDIS_URL"))?;
            tracing::info!("Connecting to Redis job queue");
            let retention = RetentionPolicy::default().succeeded.max_age;
            JobsHandle::Enabled(Arc::new(RedisQueue::new(url, retention, config.visibility_timeout())?))
        } else {
            JobsHandle::Disabled
        };

        let render_config = match &config.render_config_path {
            Some(path) => RenderConfig::from_json_file(path)?,
            None => RenderConfig::default(),
        };
        std::fs::create_dir_all(&config.local_asset_path)?;

        let digitizer = SubprocessDigitizer::new(
            config.digitizer_program.clone(),
            config.digitizer_script.clone(),
            config.digitizer_timeout(),
        );

        Ok(Self::new(
            jobs,
            store,
            Arc::new(digitizer),
            render_config,
            config.local_asset_path.clone(),
            config.retry_policy(),
        ))
    }
}
