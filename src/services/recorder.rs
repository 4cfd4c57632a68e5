use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{StoreError, SubmissionStore};
use crate::models::record::{RecordOutcome, SubmissionResultRecord};
use crate::models::unit::{Claim, ErrorCategory, UnitTransition};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Recorded,
    /// A row for this (unit, attempt) already existed; nothing was written.
    Duplicate,
}

/// Append-only audit log of submission attempts.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn SubmissionStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    /// Append one attempt row. Writes are idempotent on (unit, attempt), so
    /// database errors are retried a few times before giving up.
    pub async fn record(&self, record: &SubmissionResultRecord) -> Result<RecordStatus, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.append_record(record).await {
                Ok(true) => return Ok(RecordStatus::Recorded),
                Ok(false) => {
                    tracing::debug!(
                        unit_id = %record.unit_id,
                        attempt_number = record.attempt_number,
                        "Audit row already recorded"
                    );
                    return Ok(RecordStatus::Duplicate);
                }
                Err(StoreError::Database(e)) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        unit_id = %record.unit_id,
                        attempt_number = record.attempt_number,
                        write_attempt = attempt,
                        error = %e,
                        "Audit write failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                        .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every recorded attempt for a unit, oldest first.
    pub async fn history(&self, unit_id: Uuid) -> Result<Vec<SubmissionResultRecord>, StoreError> {
        self.store.unit_records(unit_id).await
    }
}

/// Audit row for an attempt that committed `transition`. The attempt number
/// is the unit's attempt count after the attempt, so the first is 1.
pub fn attempt_record(
    claim: &Claim,
    transition: &UnitTransition,
    duration_ms: i64,
    captcha_solves: i32,
    now: DateTime<Utc>,
) -> SubmissionResultRecord {
    let (outcome, listing_url) = match transition {
        UnitTransition::Succeed { listing_url } => (RecordOutcome::Success, listing_url.clone()),
        UnitTransition::Skip { .. } => (RecordOutcome::Skip, None),
        UnitTransition::Fail { .. } | UnitTransition::Requeue { .. } => {
            (RecordOutcome::Failure, None)
        }
    };
    SubmissionResultRecord {
        unit_id: claim.unit_id,
        job_id: claim.job_id,
        attempt_number: claim.attempt_count + 1,
        outcome,
        error_category: transition.error(),
        listing_url,
        duration_ms,
        captcha_solves,
        worker_id: claim.worker_id.clone(),
        recorded_at: now,
    }
}

/// Audit row for an attempt abandoned by a worker that stopped responding.
pub fn abandoned_record(
    unit_id: Uuid,
    job_id: Uuid,
    attempt_number: i32,
    worker_id: &str,
    now: DateTime<Utc>,
) -> SubmissionResultRecord {
    SubmissionResultRecord {
        unit_id,
        job_id,
        attempt_number,
        outcome: RecordOutcome::Failure,
        error_category: Some(ErrorCategory::Abandoned),
        listing_url: None,
        duration_ms: 0,
        captcha_solves: 0,
        worker_id: worker_id.to_string(),
        recorded_at: now,
    }
}
