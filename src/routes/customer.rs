use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::summary::CustomerJobSummary;

/// GET /api/v1/customer/jobs/{job_id}: progress without failure details.
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CustomerJobSummary>, ApiError> {
    state
        .queue
        .aggregator()
        .customer_summary(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))
}
