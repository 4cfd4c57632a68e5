use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::models::unit::UnitState;

/// Unit state counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub total: i64,
    pub queued: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl UnitCounts {
    pub fn tally<I: IntoIterator<Item = UnitState>>(states: I) -> Self {
        let mut counts = UnitCounts::default();
        for state in states {
            counts.total += 1;
            match state {
                UnitState::Queued => counts.queued += 1,
                UnitState::Claimed | UnitState::InProgress => counts.in_progress += 1,
                UnitState::Succeeded => counts.succeeded += 1,
                UnitState::Failed => counts.failed += 1,
                UnitState::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    pub fn terminal(&self) -> i64 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn all_terminal(&self) -> bool {
        self.terminal() == self.total
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let pct = self.terminal() as f64 * 100.0 / self.total as f64;
        (pct * 10.0).round() / 10.0
    }

    /// Terminal job status implied by these counts, or `None` while any unit
    /// is still queued or held by a worker.
    pub fn settled_status(&self) -> Option<JobStatus> {
        if !self.all_terminal() {
            return None;
        }
        if self.failed == 0 {
            Some(JobStatus::Completed)
        } else if self.failed == self.total {
            Some(JobStatus::Failed)
        } else {
            Some(JobStatus::PartiallyCompleted)
        }
    }
}

/// Staff-facing progress projection for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: i64,
    pub queued: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
    pub percent_complete: f64,
}

impl JobSummary {
    pub fn new(job_id: Uuid, status: JobStatus, counts: UnitCounts) -> Self {
        Self {
            job_id,
            status,
            total: counts.total,
            queued: counts.queued,
            in_progress: counts.in_progress,
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            percent_complete: counts.percent_complete(),
        }
    }
}

/// Customer-facing subset. Carries no error categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerJobSummary {
    pub job_id: Uuid,
    pub percent_complete: f64,
    pub succeeded: i64,
    pub failed: i64,
}

impl From<&JobSummary> for CustomerJobSummary {
    fn from(summary: &JobSummary) -> Self {
        Self {
            job_id: summary.job_id,
            percent_complete: summary.percent_complete,
            succeeded: summary.succeeded,
            failed: summary.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(states: &[(UnitState, usize)]) -> UnitCounts {
        UnitCounts::tally(
            states
                .iter()
                .flat_map(|(state, n)| std::iter::repeat(*state).take(*n)),
        )
    }

    #[test]
    fn test_completed_requires_zero_failures() {
        let c = counts(&[(UnitState::Succeeded, 5)]);
        assert_eq!(c.settled_status(), Some(JobStatus::Completed));

        let c = counts(&[(UnitState::Succeeded, 4), (UnitState::Failed, 1)]);
        assert_eq!(c.settled_status(), Some(JobStatus::PartiallyCompleted));
    }

    #[test]
    fn test_skips_are_not_failures() {
        let c = counts(&[(UnitState::Succeeded, 3), (UnitState::Skipped, 2)]);
        assert_eq!(c.settled_status(), Some(JobStatus::Completed));
    }

    #[test]
    fn test_never_settles_with_open_units() {
        for open in [UnitState::Queued, UnitState::Claimed, UnitState::InProgress] {
            let c = counts(&[(UnitState::Succeeded, 4), (open, 1)]);
            assert_eq!(c.settled_status(), None);
            assert_eq!(c.percent_complete(), 80.0);
        }
    }

    #[test]
    fn test_all_failed() {
        let c = counts(&[(UnitState::Failed, 3)]);
        assert_eq!(c.settled_status(), Some(JobStatus::Failed));
    }

    #[test]
    fn test_empty_job_is_complete() {
        let c = UnitCounts::default();
        assert_eq!(c.percent_complete(), 100.0);
        assert_eq!(c.settled_status(), Some(JobStatus::Completed));
    }

    #[test]
    fn test_customer_view_drops_internal_counts() {
        let summary = JobSummary::new(
            Uuid::new_v4(),
            JobStatus::InProgress,
            counts(&[(UnitState::Succeeded, 1), (UnitState::Queued, 1)]),
        );
        let customer = CustomerJobSummary::from(&summary);
        assert_eq!(customer.succeeded, 1);
        assert_eq!(customer.percent_complete, 50.0);
        let json = serde_json::to_value(&customer).unwrap();
        assert!(json.get("skipped").is_none());
    }
}
