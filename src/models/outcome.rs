use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::models::unit::ErrorCategory;

/// Coarse result of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    Recaptcha,
    Hcaptcha,
    Unknown,
}

/// A CAPTCHA found on a directory page, handed to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub kind: CaptchaKind,
    pub site_key: Option<String>,
    pub page_url: String,
}

/// Structured result returned by a submission worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub error_category: Option<ErrorCategory>,
    pub listing_url: Option<String>,
    pub duration_ms: i64,
    pub captcha: Option<CaptchaChallenge>,
    /// Operator-facing detail; never shown to customers.
    pub detail: Option<String>,
}

impl Outcome {
    pub fn success(listing_url: Option<String>, duration_ms: i64) -> Self {
        Self {
            status: OutcomeStatus::Success,
            error_category: None,
            listing_url,
            duration_ms,
            captcha: None,
            detail: None,
        }
    }

    pub fn failure(category: ErrorCategory, detail: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            error_category: Some(category),
            listing_url: None,
            duration_ms,
            captcha: None,
            detail: Some(detail.into()),
        }
    }

    pub fn blocked(category: ErrorCategory, duration_ms: i64) -> Self {
        Self {
            status: OutcomeStatus::Blocked,
            error_category: Some(category),
            listing_url: None,
            duration_ms,
            captcha: None,
            detail: None,
        }
    }

    pub fn captcha(challenge: CaptchaChallenge, duration_ms: i64) -> Self {
        Self {
            captcha: Some(challenge),
            ..Self::blocked(ErrorCategory::CaptchaRequired, duration_ms)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
