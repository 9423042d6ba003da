use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::jobs::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Required unless persistence is disabled.
    pub database_url: Option<String>,

    /// Redis connection string for the stage queues. Required unless jobs are disabled.
    pub redis_url: Option<String>,

    /// Directory for canonical images, render artifacts and packs.
    #[serde(default = "default_asset_path")]
    pub local_asset_path: PathBuf,

    /// Optional JSON file overriding the default render configuration.
    pub render_config_path: Option<PathBuf>,

    /// Interpreter or binary that runs the digitizer.
    #[serde(default = "default_digitizer_program")]
    pub digitizer_program: String,

    /// Script passed as the digitizer's first argument.
    pub digitizer_script: Option<PathBuf>,

    #[serde(default = "default_digitizer_timeout_secs")]
    pub digitizer_timeout_secs: u64,

    #[serde(default = "default_two")]
    pub render_worker_concurrency: usize,

    #[serde(default = "default_two")]
    pub digitize_worker_concurrency: usize,

    #[serde(default = "default_one")]
    pub production_pack_worker_concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub job_max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub job_backoff_base_ms: u64,

    /// How long a popped job may stay unacknowledged before it is treated as
    /// stalled and redelivered. Keep it above the digitizer timeout.
    #[serde(default = "default_visibility_timeout_secs")]
    pub job_visibility_timeout_secs: u64,

    /// Address of the worker's Prometheus scrape endpoint.
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    #[serde(default)]
    pub disable_jobs: bool,

    #[serde(default)]
    pub disable_db: bool,

    /// Runs without queue or database; implies both flags above.
    #[serde(default)]
    pub demo_mode: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_asset_path() -> PathBuf {
    PathBuf::from(".artifacts")
}

fn default_digitizer_program() -> String {
    "python3".to_string()
}

fn default_digitizer_timeout_secs() -> u64 {
    300
}

fn default_two() -> usize {
    2
}

fn default_one() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_visibility_timeout_secs() -> u64 {
    900
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.job_max_attempts, Duration::from_millis(self.job_backoff_base_ms))
    }

    pub fn digitizer_timeout(&self) -> Duration {
        Duration::from_secs(self.digitizer_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.job_visibility_timeout_secs)
    }
}

/// Which external capabilities this process may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub jobs: bool,
    pub db: bool,
}

impl Capabilities {
    pub fn resolve(config: &AppConfig) -> Self {
        Self {
            jobs: !(config.disable_jobs || config.demo_mode),
            db: !(config.disable_db || config.demo_mode),
        }
    }
}
