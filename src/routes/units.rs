use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::record::SubmissionResultRecord;
use crate::models::unit::SubmissionUnit;

/// POST /api/v1/units/{unit_id}/retry: staff override for failed/skipped units.
pub async fn retry_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Result<Json<SubmissionUnit>, ApiError> {
    Ok(Json(state.queue.retry_unit(unit_id).await?))
}

/// GET /api/v1/units/{unit_id}/history: audit rows, oldest attempt first.
pub async fn unit_history(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Result<Json<Vec<SubmissionResultRecord>>, ApiError> {
    if state.store.get_unit(unit_id).await?.is_none() {
        return Err(ApiError::not_found(format!("unit {}", unit_id)));
    }
    Ok(Json(state.queue.recorder().history(unit_id).await?))
}
