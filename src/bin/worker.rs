use std::net::SocketAddr;
use std::sync::Arc;

use directory_dispatch::{
    bootstrap,
    config::AppConfig,
    routes,
    services::{dispatcher::Dispatcher, queue::JobQueueManager, worker::HttpFormWorker},
};
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::main]
async fn main() {
    bootstrap::init_tracing();

    tracing::info!("Starting directory submission worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config
        .database_url
        .as_deref()
        .expect("DATABASE_URL is required for a standalone worker");

    // Worker metrics get their own scrape listener
    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        routes::metrics::describe();
        tracing::info!("Worker metrics listening on {}", addr);
    }

    let store = bootstrap::connect_store(&config)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let catalog = bootstrap::load_catalog(&config).expect("Failed to load directory catalog");
    let solver = bootstrap::captcha_solver(&config).expect("Failed to initialize CAPTCHA solver");
    let (rate_limiter, _) =
        bootstrap::rate_limiter(&config).expect("Failed to initialize rate limiter");
    let worker = HttpFormWorker::new(rate_limiter, config.submission_timeout())
        .expect("Failed to initialize HTTP form worker");

    let queue = JobQueueManager::new(store, catalog, config.queue_policy(), solver.is_some());
    let dispatcher = Dispatcher::new(queue, Arc::new(worker), solver, config.dispatcher_config());

    tracing::info!(
        worker_id = %config.worker_id,
        slots = config.worker_slots,
        "Worker ready, starting dispatch loop"
    );

    dispatcher.run(bootstrap::shutdown_signal()).await;
}
