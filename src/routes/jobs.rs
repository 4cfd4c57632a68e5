use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::db::JobFilter;
use crate::models::job::{Job, NewJob, PackageTier};
use crate::models::summary::JobSummary;

/// POST /api/v1/jobs: payment confirmation creates a job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(new_job): Json<NewJob>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.queue.enqueue(new_job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub tier: Option<PackageTier>,
    pub customer_id: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs: jobs still pending or in progress, by priority.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let filter = JobFilter {
        tier: query.tier,
        customer_id: query.customer_id,
        limit: query.limit.map(|l| l.clamp(1, 500)),
        ..Default::default()
    };
    Ok(Json(state.queue.list_pending_jobs(filter).await?))
}

/// GET /api/v1/jobs/{job_id}/summary: staff progress view.
pub async fn job_summary(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobSummary>, ApiError> {
    state
        .queue
        .aggregator()
        .job_summary(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub skipped_units: u64,
}

/// POST /api/v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let skipped_units = state.queue.cancel_job(job_id).await?;
    Ok(Json(CancelResponse {
        job_id,
        skipped_units,
    }))
}
