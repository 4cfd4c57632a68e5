use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// State of a directory submission unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitState {
    Queued,
    Claimed,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Succeeded | UnitState::Failed | UnitState::Skipped
        )
    }

    /// Held by a worker.
    pub fn is_held(self) -> bool {
        matches!(self, UnitState::Claimed | UnitState::InProgress)
    }
}

/// How the retry classifier treats an error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after backoff.
    Transient,
    /// Retrying cannot help.
    Permanent,
    /// Requires human action or a challenge solution.
    Blocking,
    /// Set by the engine itself (sweeps, cancellation).
    Administrative,
}

/// Classification of a failed or blocked attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    CaptchaRequired,
    CaptchaUnsolved,
    LoginRequired,
    ManualReviewRequired,
    Timeout,
    Network,
    ServerError,
    RateLimited,
    Unconfirmed,
    ValidationRejected,
    DirectoryDefunct,
    Abandoned,
    Cancelled,
}

impl ErrorCategory {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorCategory::Timeout
            | ErrorCategory::Network
            | ErrorCategory::ServerError
            | ErrorCategory::RateLimited
            | ErrorCategory::Unconfirmed
            | ErrorCategory::CaptchaUnsolved => ErrorClass::Transient,
            ErrorCategory::ValidationRejected | ErrorCategory::DirectoryDefunct => {
                ErrorClass::Permanent
            }
            ErrorCategory::CaptchaRequired
            | ErrorCategory::LoginRequired
            | ErrorCategory::ManualReviewRequired => ErrorClass::Blocking,
            ErrorCategory::Abandoned | ErrorCategory::Cancelled => ErrorClass::Administrative,
        }
    }
}

/// Atomic work item: one (job, directory) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionUnit {
    pub id: Uuid,
    pub job_id: Uuid,
    pub directory_id: String,
    /// Order within the job, by descending directory priority.
    pub position: i32,
    /// Copied from the job tier so claims can order without a join.
    pub priority_band: i32,
    pub job_created_at: DateTime<Utc>,
    pub state: UnitState,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub last_error: Option<ErrorCategory>,
    pub next_eligible_at: DateTime<Utc>,
    pub listing_url: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionUnit {
    /// The claim token for the current holder, if any.
    pub fn claim(&self) -> Option<Claim> {
        if !self.state.is_held() {
            return None;
        }
        self.claimed_by.as_ref().map(|worker_id| Claim {
            unit_id: self.id,
            job_id: self.job_id,
            worker_id: worker_id.clone(),
            attempt_count: self.attempt_count,
        })
    }

    /// Claim ordering: priority band first, then job FIFO, then directory order.
    pub fn claim_order(a: &SubmissionUnit, b: &SubmissionUnit) -> std::cmp::Ordering {
        b.priority_band
            .cmp(&a.priority_band)
            .then(a.job_created_at.cmp(&b.job_created_at))
            .then(a.job_id.cmp(&b.job_id))
            .then(a.position.cmp(&b.position))
    }
}

/// Proof that a worker holds a unit. Every state change after the claim is
/// conditional on all of these fields still matching the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub unit_id: Uuid,
    pub job_id: Uuid,
    pub worker_id: String,
    pub attempt_count: i32,
}

/// Where an attempt leaves the unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitTransition {
    Requeue {
        next_eligible_at: DateTime<Utc>,
        error: ErrorCategory,
    },
    Succeed {
        listing_url: Option<String>,
    },
    Fail {
        error: ErrorCategory,
    },
    Skip {
        error: ErrorCategory,
    },
}

impl UnitTransition {
    pub fn target_state(&self) -> UnitState {
        match self {
            UnitTransition::Requeue { .. } => UnitState::Queued,
            UnitTransition::Succeed { .. } => UnitState::Succeeded,
            UnitTransition::Fail { .. } => UnitState::Failed,
            UnitTransition::Skip { .. } => UnitState::Skipped,
        }
    }

    pub fn error(&self) -> Option<ErrorCategory> {
        match self {
            UnitTransition::Requeue { error, .. }
            | UnitTransition::Fail { error }
            | UnitTransition::Skip { error } => Some(*error),
            UnitTransition::Succeed { .. } => None,
        }
    }
}
