use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_depth: Option<i64>,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E>(result: Result<(), E>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            latency_ms: None,
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != "error"
    }
}

/// GET /health: store and Redis connectivity plus current queue depth.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let database = ComponentHealth::from_check(state.store.health_check().await, start);

    let redis = match &state.redis {
        Some(limiter) => {
            let start = Instant::now();
            ComponentHealth::from_check(limiter.health_check().await, start)
        }
        None => ComponentHealth::disabled(),
    };

    let queue_depth = state.store.queue_depth().await.ok();
    if let Some(depth) = queue_depth {
        metrics::gauge!("submission_queue_depth").set(depth as f64);
    }

    let all_healthy = database.is_healthy() && redis.is_healthy();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_depth,
        checks: HealthChecks { database, redis },
    };

    (status_code, Json(response))
}
