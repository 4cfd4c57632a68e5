use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use directory_dispatch::{
    app_state::AppState,
    bootstrap,
    config::AppConfig,
    routes,
    services::{dispatcher::Dispatcher, queue::JobQueueManager, worker::HttpFormWorker},
};

#[tokio::main]
async fn main() {
    bootstrap::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing directory-dispatch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let store = bootstrap::connect_store(&config)
        .await
        .expect("Failed to initialize submission store");
    let catalog = bootstrap::load_catalog(&config).expect("Failed to load directory catalog");
    let solver = bootstrap::captcha_solver(&config).expect("Failed to initialize CAPTCHA solver");
    let (rate_limiter, redis) =
        bootstrap::rate_limiter(&config).expect("Failed to initialize rate limiter");

    let queue = JobQueueManager::new(
        store.clone(),
        catalog,
        config.queue_policy(),
        solver.is_some(),
    );

    // Nothing outside this process can reach an in-memory store, so process
    // units here.
    let embedded = if config.database_url.is_none() {
        let worker = HttpFormWorker::new(rate_limiter, config.submission_timeout())
            .expect("Failed to initialize HTTP form worker");
        let dispatcher = Dispatcher::new(
            queue.clone(),
            Arc::new(worker),
            solver,
            config.dispatcher_config(),
        );
        Some(tokio::spawn(async move {
            dispatcher.run(bootstrap::shutdown_signal()).await
        }))
    } else {
        None
    };

    let state = AppState::new(store, queue, redis);

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // Payment confirmations are small JSON documents
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(bootstrap::shutdown_signal())
        .await
        .expect("Server error");

    if let Some(handle) = embedded {
        let _ = handle.await;
    }
}
