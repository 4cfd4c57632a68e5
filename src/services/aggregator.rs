use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{StoreError, SubmissionStore};
use crate::models::job::JobStatus;
use crate::models::summary::{CustomerJobSummary, JobSummary, UnitCounts};

/// Read-side projection of job progress, recomputed from unit rows.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn SubmissionStore>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    async fn counts(&self, job_id: Uuid) -> Result<UnitCounts, StoreError> {
        let units = self.store.job_units(job_id).await?;
        Ok(UnitCounts::tally(units.iter().map(|u| u.state)))
    }

    pub async fn job_summary(&self, job_id: Uuid) -> Result<Option<JobSummary>, StoreError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        let counts = self.counts(job_id).await?;
        Ok(Some(JobSummary::new(job_id, job.status, counts)))
    }

    pub async fn customer_summary(
        &self,
        job_id: Uuid,
    ) -> Result<Option<CustomerJobSummary>, StoreError> {
        Ok(self
            .job_summary(job_id)
            .await?
            .map(|summary| CustomerJobSummary::from(&summary)))
    }

    /// Move the job to its terminal status once every unit is terminal.
    /// Returns the status set, or `None` if the job is still running, already
    /// settled, or cancelled.
    pub async fn settle(&self, job_id: Uuid) -> Result<Option<JobStatus>, StoreError> {
        let Some((status, counts)) = self.store.settle_job(job_id, Utc::now()).await? else {
            return Ok(None);
        };

        metrics::counter!("submission_jobs_settled_total", "status" => status.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job_id,
            status = %status,
            succeeded = counts.succeeded,
            failed = counts.failed,
            skipped = counts.skipped,
            "Job settled"
        );
        Ok(Some(status))
    }
}
