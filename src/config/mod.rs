use std::time::Duration;

use serde::Deserialize;

use crate::models::job::PackageTier;
use crate::services::classifier::RetryPolicy;
use crate::services::dispatcher::DispatcherConfig;
use crate::services::queue::QueuePolicy;
use crate::services::validation::TierPolicies;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Ignored by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it the server keeps everything
    /// in memory and processes units itself.
    pub database_url: Option<String>,

    /// Redis connection string for the shared per-directory rate limiter.
    pub redis_url: Option<String>,

    /// Directory catalog JSON export
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Identity written into claims and audit rows
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Prometheus listener for the standalone worker, e.g. "0.0.0.0:9100"
    pub worker_metrics_addr: Option<String>,

    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long a claim may go without completing before it is released
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    #[serde(default = "default_captcha_sub_attempts")]
    pub captcha_sub_attempts: i32,

    /// CAPTCHA solving service base URL. CAPTCHA directories are skipped
    /// when unset.
    pub captcha_solver_url: Option<String>,

    #[serde(default)]
    pub captcha_solver_key: String,

    /// Per-request timeout for directory pages and the solver
    #[serde(default = "default_submission_timeout_secs")]
    pub submission_timeout_secs: u64,

    #[serde(default = "default_starter_limit")]
    pub starter_directory_limit: i32,

    #[serde(default = "default_growth_limit")]
    pub growth_directory_limit: i32,

    #[serde(default = "default_pro_limit")]
    pub pro_directory_limit: i32,

    #[serde(default)]
    pub subscription_directory_limit: i32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_catalog_path() -> String {
    "data/directories.json".to_string()
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

fn default_worker_slots() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_stale_threshold_secs() -> u64 {
    600
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_cap_secs() -> u64 {
    300
}

fn default_captcha_sub_attempts() -> i32 {
    2
}

fn default_submission_timeout_secs() -> u64 {
    30
}

fn default_starter_limit() -> i32 {
    50
}

fn default_growth_limit() -> i32 {
    100
}

fn default_pro_limit() -> i32 {
    200
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            captcha_sub_attempts: self.captcha_sub_attempts.max(0),
        }
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        let mut tiers = TierPolicies::default();
        for (tier, limit) in [
            (PackageTier::Starter, self.starter_directory_limit),
            (PackageTier::Growth, self.growth_directory_limit),
            (PackageTier::Pro, self.pro_directory_limit),
            (PackageTier::Subscription, self.subscription_directory_limit),
        ] {
            tiers.get_mut(tier).max_directories = limit.max(0);
        }

        QueuePolicy {
            tiers,
            retry: self.retry_policy(),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_id: self.worker_id.clone(),
            slots: self.worker_slots.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }
}
