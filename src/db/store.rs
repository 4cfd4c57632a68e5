//! Storage abstraction for the submission engine.
//!
//! Every unit mutation after creation is a conditional update: the row is
//! changed only if its current state (and, for held units, its holder and
//! attempt count) still match what the caller expects. Backends must make
//! each method atomic on its own; callers never hold locks across calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, PackageTier};
use crate::models::record::SubmissionResultRecord;
use crate::models::summary::UnitCounts;
use crate::models::unit::{Claim, SubmissionUnit, UnitTransition};

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub tier: Option<PackageTier>,
    pub customer_id: Option<String>,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.tier.map_or(true, |tier| tier == job.tier)
            && self
                .customer_id
                .as_deref()
                .map_or(true, |customer| customer == job.customer_id)
    }
}

/// A unit recovered from a crashed or stalled worker.
#[derive(Debug, Clone)]
pub struct ReleasedUnit {
    pub unit: SubmissionUnit,
    pub previous_worker: String,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a job together with all of its units.
    async fn insert_job(&self, job: &Job, units: &[SubmissionUnit]) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Set the job status if its current status is one of `from`.
    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        from: &[JobStatus],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SubmissionUnit>, StoreError>;

    async fn job_units(&self, job_id: Uuid) -> Result<Vec<SubmissionUnit>, StoreError>;

    /// Claim up to `limit` queued, eligible units of jobs that are not
    /// cancelled for `worker_id`, in claim order. Owning jobs still pending
    /// move to in-progress.
    async fn claim_units(
        &self,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubmissionUnit>, StoreError>;

    /// `claimed -> in_progress`, if the claim is still held.
    async fn start_unit(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Apply an attempt's transition, bumping the attempt count, if the claim
    /// is still held. Returns the updated unit, or `None` when stale.
    async fn finish_unit(
        &self,
        claim: &Claim,
        transition: &UnitTransition,
        processing_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError>;

    /// Requeue units held since before `cutoff`, bumping their attempt count.
    /// Units whose budget that exhausts become failed instead.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedUnit>, StoreError>;

    /// `failed | skipped -> queued`, eligible at `now`, granting `extra_attempts`
    /// on top of the attempts already spent. A settled job moves back to
    /// in-progress in the same step. Units of cancelled jobs are left alone.
    async fn requeue_unit(
        &self,
        unit_id: Uuid,
        extra_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError>;

    /// If the job is pending or in progress and every one of its units is
    /// terminal, set the status the unit counts imply. Counting and the status
    /// change are one atomic step with respect to `requeue_unit`.
    async fn settle_job(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobStatus, UnitCounts)>, StoreError>;

    /// Skip every non-terminal unit of a job in one update. Returns the count.
    async fn cancel_job_units(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Append an audit row. Returns `false` if (unit, attempt) already exists.
    async fn append_record(&self, record: &SubmissionResultRecord) -> Result<bool, StoreError>;

    async fn unit_records(&self, unit_id: Uuid) -> Result<Vec<SubmissionResultRecord>, StoreError>;

    /// Number of units waiting in the queue.
    async fn queue_depth(&self) -> Result<i64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}
