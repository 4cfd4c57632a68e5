//! Startup wiring shared by the API server and the worker binary.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::{self, MemoryStore, PgStore, SubmissionStore};
use crate::services::captcha::{CaptchaSolver, HttpCaptchaSolver, SolverError};
use crate::services::catalog::{CatalogError, StaticCatalog};
use crate::services::rate_limit::{MemoryRateLimiter, RateLimitError, RateLimiter, RedisRateLimiter};

/// Structured JSON logging, `RUST_LOG` filter defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Postgres store (migrated) when a database is configured, memory otherwise.
pub async fn connect_store(config: &AppConfig) -> Result<Arc<dyn SubmissionStore>, sqlx::Error> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(url).await?;
            tracing::info!("Running database migrations");
            db::run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn load_catalog(config: &AppConfig) -> Result<Arc<StaticCatalog>, CatalogError> {
    Ok(Arc::new(StaticCatalog::from_json_file(&config.catalog_path)?))
}

pub fn captcha_solver(
    config: &AppConfig,
) -> Result<Option<Arc<dyn CaptchaSolver>>, SolverError> {
    let Some(url) = &config.captcha_solver_url else {
        tracing::info!("No CAPTCHA solver configured, CAPTCHA directories will be skipped");
        return Ok(None);
    };
    let solver = HttpCaptchaSolver::new(
        url,
        config.captcha_solver_key.clone(),
        config.submission_timeout(),
    )?;
    Ok(Some(Arc::new(solver)))
}

/// Redis limiter when Redis is configured, returned separately for health
/// checks, alongside the limiter workers should use.
pub fn rate_limiter(
    config: &AppConfig,
) -> Result<(Arc<dyn RateLimiter>, Option<Arc<RedisRateLimiter>>), RateLimitError> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis for shared directory rate limits");
            let redis = Arc::new(RedisRateLimiter::new(url)?);
            let shared: Arc<dyn RateLimiter> = redis.clone();
            Ok((shared, Some(redis)))
        }
        None => Ok((Arc::new(MemoryRateLimiter::new()), None)),
    }
}

/// Resolves on ctrl-c.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
