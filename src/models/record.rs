use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::unit::ErrorCategory;

/// Outcome as it appears in the audit log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordOutcome {
    Success,
    Failure,
    Skip,
}

/// Append-only audit row, unique per (unit_id, attempt_number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResultRecord {
    pub unit_id: Uuid,
    pub job_id: Uuid,
    pub attempt_number: i32,
    pub outcome: RecordOutcome,
    pub error_category: Option<ErrorCategory>,
    pub listing_url: Option<String>,
    pub duration_ms: i64,
    pub captcha_solves: i32,
    pub worker_id: String,
    pub recorded_at: DateTime<Utc>,
}
