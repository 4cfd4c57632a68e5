use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{JobFilter, ReleasedUnit, StoreError, SubmissionStore};
use crate::models::job::{Job, JobStatus, NewJob};
use crate::models::unit::{Claim, SubmissionUnit, UnitState};
use crate::services::aggregator::StatusAggregator;
use crate::services::catalog::DirectoryCatalog;
use crate::services::classifier::{Decision, RetryPolicy};
use crate::services::recorder::{self, AuditRecorder};
use crate::services::validation::{self, TierPolicies, ValidationError};

/// Knobs of the queue: what each tier buys, the retry budget, and how long a
/// claim may go silent before the sweep takes it back.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub tiers: TierPolicies,
    pub retry: RetryPolicy,
    pub stale_threshold: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            tiers: TierPolicies::default(),
            retry: RetryPolicy::default(),
            stale_threshold: Duration::from_secs(600),
        }
    }
}

/// A unit just claimed, with the token that proves ownership.
#[derive(Debug, Clone)]
pub struct ClaimedUnit {
    pub unit: SubmissionUnit,
    pub claim: Claim,
}

#[derive(Debug, Clone)]
pub enum Completion {
    Applied(SubmissionUnit),
    /// The unit was cancelled or swept while the attempt ran; its outcome
    /// was discarded.
    Stale,
}

/// Owns job lifecycle: intake, claims, attempt results, recovery and staff
/// overrides. Every unit mutation goes through a conditional store update.
#[derive(Clone)]
pub struct JobQueueManager {
    store: Arc<dyn SubmissionStore>,
    catalog: Arc<dyn DirectoryCatalog>,
    recorder: AuditRecorder,
    aggregator: StatusAggregator,
    policy: Arc<QueuePolicy>,
    solver_available: bool,
}

impl JobQueueManager {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        catalog: Arc<dyn DirectoryCatalog>,
        policy: QueuePolicy,
        solver_available: bool,
    ) -> Self {
        Self {
            recorder: AuditRecorder::new(store.clone()),
            aggregator: StatusAggregator::new(store.clone()),
            store,
            catalog,
            policy: Arc::new(policy),
            solver_available,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    pub fn aggregator(&self) -> &StatusAggregator {
        &self.aggregator
    }

    pub fn catalog(&self) -> &Arc<dyn DirectoryCatalog> {
        &self.catalog
    }

    /// Validate a payment confirmation and create the job with one unit per
    /// eligible directory, best directories first.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job, QueueError> {
        let tier_policy = self.policy.tiers.get(new_job.tier);
        let directory_limit = validation::validate_new_job(&new_job, tier_policy)?;

        let filter = tier_policy.directory_filter(
            &new_job.business_profile,
            self.solver_available,
            directory_limit,
        );
        let directories = self.catalog.list_directories(&filter);

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            customer_id: new_job.customer_id,
            tier: new_job.tier,
            directory_limit,
            status: if directories.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::Pending
            },
            business_profile: new_job.business_profile,
            created_at: now,
            updated_at: now,
        };

        let units: Vec<SubmissionUnit> = directories
            .iter()
            .enumerate()
            .map(|(position, directory)| SubmissionUnit {
                id: Uuid::new_v4(),
                job_id: job.id,
                directory_id: directory.id.clone(),
                position: position as i32,
                priority_band: job.tier.band(),
                job_created_at: job.created_at,
                state: UnitState::Queued,
                attempt_count: 0,
                max_attempts: self.policy.retry.max_attempts,
                last_error: None,
                next_eligible_at: now,
                listing_url: None,
                processing_time_ms: None,
                claimed_by: None,
                claimed_at: None,
                updated_at: now,
            })
            .collect();

        self.store.insert_job(&job, &units).await?;

        metrics::counter!("submission_jobs_enqueued_total", "tier" => job.tier.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job.id,
            customer_id = %job.customer_id,
            tier = %job.tier,
            directory_limit,
            units = units.len(),
            status = %job.status,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Claim up to `slots` eligible units for `worker_id`.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        slots: usize,
    ) -> Result<Vec<ClaimedUnit>, QueueError> {
        if slots == 0 {
            return Ok(Vec::new());
        }
        let units = self
            .store
            .claim_units(worker_id, slots as i64, Utc::now())
            .await?;

        let claimed: Vec<ClaimedUnit> = units
            .into_iter()
            .filter_map(|unit| unit.claim().map(|claim| ClaimedUnit { unit, claim }))
            .collect();

        if !claimed.is_empty() {
            metrics::counter!("submission_units_claimed_total").increment(claimed.len() as u64);
            tracing::debug!(worker_id = %worker_id, claimed = claimed.len(), "Claimed units");
        }
        Ok(claimed)
    }

    /// Mark the unit in progress. `false` means the claim was lost.
    pub async fn start_unit(&self, claim: &Claim) -> Result<bool, QueueError> {
        Ok(self.store.start_unit(claim, Utc::now()).await?)
    }

    /// Commit an attempt's decision, append it to the audit log and settle the
    /// job if the unit went terminal.
    pub async fn complete_attempt(
        &self,
        claim: &Claim,
        decision: &Decision,
        duration_ms: i64,
        captcha_solves: i32,
    ) -> Result<Completion, QueueError> {
        let Some(transition) = decision.transition() else {
            return Err(QueueError::InvalidTransition(format!(
                "{} does not complete an attempt",
                decision.label()
            )));
        };

        let now = Utc::now();
        let Some(unit) = self
            .store
            .finish_unit(claim, &transition, duration_ms, now)
            .await?
        else {
            tracing::debug!(
                unit_id = %claim.unit_id,
                worker_id = %claim.worker_id,
                "Claim no longer held, discarding outcome"
            );
            return Ok(Completion::Stale);
        };

        metrics::counter!("submission_attempts_total", "outcome" => decision.label())
            .increment(1);

        let record = recorder::attempt_record(claim, &transition, duration_ms, captcha_solves, now);
        if let Err(e) = self.recorder.record(&record).await {
            tracing::error!(
                unit_id = %claim.unit_id,
                attempt_number = record.attempt_number,
                error = %e,
                "Failed to record attempt"
            );
        }

        if unit.state.is_terminal() {
            self.aggregator.settle(unit.job_id).await?;
        }
        Ok(Completion::Applied(unit))
    }

    /// Take back units whose holder went silent for longer than the stale
    /// threshold. Each release costs one attempt.
    pub async fn release_abandoned(&self) -> Result<Vec<ReleasedUnit>, QueueError> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.policy.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        self.release_claimed_before(now - threshold, now).await
    }

    async fn release_claimed_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedUnit>, QueueError> {
        let released = self.store.release_stale(cutoff, now).await?;

        for ReleasedUnit {
            unit,
            previous_worker,
        } in &released
        {
            tracing::warn!(
                unit_id = %unit.id,
                job_id = %unit.job_id,
                directory_id = %unit.directory_id,
                worker_id = %previous_worker,
                attempt_count = unit.attempt_count,
                state = %unit.state,
                "Released abandoned unit"
            );
            let record = recorder::abandoned_record(
                unit.id,
                unit.job_id,
                unit.attempt_count,
                previous_worker,
                now,
            );
            if let Err(e) = self.recorder.record(&record).await {
                tracing::error!(unit_id = %unit.id, error = %e, "Failed to record abandoned attempt");
            }
            if unit.state.is_terminal() {
                self.aggregator.settle(unit.job_id).await?;
            }
        }
        Ok(released)
    }

    /// Staff override: give a failed or skipped unit a fresh retry budget.
    pub async fn retry_unit(&self, unit_id: Uuid) -> Result<SubmissionUnit, QueueError> {
        let unit = self
            .store
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("unit {}", unit_id)))?;
        let job = self
            .store
            .get_job(unit.job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("job {}", unit.job_id)))?;

        if job.status == JobStatus::Cancelled {
            return Err(QueueError::InvalidTransition(format!(
                "job {} is cancelled",
                job.id
            )));
        }
        if !matches!(unit.state, UnitState::Failed | UnitState::Skipped) {
            return Err(QueueError::InvalidTransition(format!(
                "unit {} is {}",
                unit_id, unit.state
            )));
        }

        let requeued = self
            .store
            .requeue_unit(unit_id, self.policy.retry.max_attempts, Utc::now())
            .await?
            .ok_or_else(|| {
                QueueError::InvalidTransition(format!("unit {} changed state", unit_id))
            })?;

        tracing::info!(
            unit_id = %unit_id,
            job_id = %job.id,
            attempt_count = requeued.attempt_count,
            max_attempts = requeued.max_attempts,
            "Unit requeued by staff"
        );
        Ok(requeued)
    }

    /// Stop a job: every unit not yet terminal is skipped. Attempts already in
    /// flight finish but their results are discarded.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cancelled = self
            .store
            .update_job_status(
                job_id,
                JobStatus::Cancelled,
                &[JobStatus::Pending, JobStatus::InProgress],
                now,
            )
            .await?;

        if !cancelled {
            let job = self
                .store
                .get_job(job_id)
                .await?
                .ok_or_else(|| QueueError::NotFound(format!("job {}", job_id)))?;
            if job.status == JobStatus::Cancelled {
                // Skipping is idempotent; finishes a cancel whose unit update failed
                let skipped = self.store.cancel_job_units(job_id, now).await?;
                if skipped > 0 {
                    tracing::warn!(job_id = %job_id, skipped, "Skipped leftover units of cancelled job");
                }
                return Ok(skipped);
            }
            return Err(QueueError::InvalidTransition(format!(
                "job {} is already {}",
                job_id, job.status
            )));
        }

        let skipped = self.store.cancel_job_units(job_id, now).await?;
        tracing::info!(job_id = %job_id, skipped, "Job cancelled");
        Ok(skipped)
    }

    /// Jobs still pending or running, highest priority score first.
    pub async fn list_pending_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, QueueError> {
        let filter = JobFilter {
            statuses: vec![JobStatus::Pending, JobStatus::InProgress],
            ..filter
        };
        let mut jobs = self.store.list_jobs(&filter).await?;
        let now = Utc::now();
        jobs.sort_by(|a, b| {
            b.priority_score(now)
                .cmp(&a.priority_score(now))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("job {}", job_id)))
    }

    pub async fn queue_depth(&self) -> Result<i64, QueueError> {
        Ok(self.store.queue_depth().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
