pub mod customer;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod units;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::services::queue::QueueError;

/// JSON API routes (everything except `/metrics`, which carries its own state).
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}/summary", get(jobs::job_summary))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/v1/units/{unit_id}/retry", post(units::retry_unit))
        .route("/api/v1/units/{unit_id}/history", get(units::unit_history))
        .route("/api/v1/customer/jobs/{job_id}", get(customer::job_progress))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Handler error, rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(QueueError::Store(e))
    }
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self(QueueError::NotFound(what.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            QueueError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "validation_failed".to_string(),
                    details: e.errors,
                },
            ),
            QueueError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: format!("{} not found", what),
                    details: Vec::new(),
                },
            ),
            QueueError::InvalidTransition(reason) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: reason,
                    details: Vec::new(),
                },
            ),
            QueueError::Store(e) => {
                tracing::error!(error = %e, "Store error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal error".to_string(),
                        details: Vec::new(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
