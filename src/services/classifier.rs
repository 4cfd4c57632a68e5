use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::outcome::{CaptchaChallenge, Outcome, OutcomeStatus};
use crate::models::unit::{ErrorCategory, ErrorClass, UnitTransition};

/// Retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// CAPTCHA solves allowed within a single attempt.
    pub captcha_sub_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            captcha_sub_attempts: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the unit is eligible again, given the attempts spent so
    /// far including the one that just failed: `base * 2^(attempts - 1)`.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }
}

/// What the unit looked like when the attempt started.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Solver round trips already spent within this attempt.
    pub captcha_attempts: i32,
    pub solver_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Succeeded {
        listing_url: Option<String>,
    },
    Skipped {
        error: ErrorCategory,
    },
    /// Solve the challenge and re-run the same attempt.
    RetryCaptcha {
        challenge: CaptchaChallenge,
    },
    RetryLater {
        next_eligible_at: DateTime<Utc>,
        error: ErrorCategory,
    },
    Failed {
        error: ErrorCategory,
    },
}

impl Decision {
    /// Unit transition this decision commits, `None` for in-attempt retries.
    pub fn transition(&self) -> Option<UnitTransition> {
        match self {
            Decision::Succeeded { listing_url } => Some(UnitTransition::Succeed {
                listing_url: listing_url.clone(),
            }),
            Decision::Skipped { error } => Some(UnitTransition::Skip { error: *error }),
            Decision::RetryCaptcha { .. } => None,
            Decision::RetryLater {
                next_eligible_at,
                error,
            } => Some(UnitTransition::Requeue {
                next_eligible_at: *next_eligible_at,
                error: *error,
            }),
            Decision::Failed { error } => Some(UnitTransition::Fail { error: *error }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Succeeded { .. } => "succeeded",
            Decision::Skipped { .. } => "skipped",
            Decision::RetryCaptcha { .. } => "retry_captcha",
            Decision::RetryLater { .. } => "retry_later",
            Decision::Failed { .. } => "failed",
        }
    }
}

/// Decide what happens to a unit after a worker outcome.
pub fn classify(
    outcome: &Outcome,
    ctx: &AttemptContext,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Decision {
    match outcome.status {
        OutcomeStatus::Success => Decision::Succeeded {
            listing_url: outcome.listing_url.clone(),
        },
        OutcomeStatus::Blocked => classify_blocked(outcome, ctx, policy, now),
        OutcomeStatus::Failure => {
            let category = outcome.error_category.unwrap_or(ErrorCategory::Unconfirmed);
            classify_category(category, ctx, policy, now)
        }
    }
}

fn classify_blocked(
    outcome: &Outcome,
    ctx: &AttemptContext,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Decision {
    let category = outcome
        .error_category
        .unwrap_or(ErrorCategory::ManualReviewRequired);

    if category != ErrorCategory::CaptchaRequired {
        return Decision::Skipped { error: category };
    }
    if !ctx.solver_available {
        return Decision::Skipped { error: category };
    }

    match &outcome.captcha {
        Some(challenge) if ctx.captcha_attempts < policy.captcha_sub_attempts => {
            Decision::RetryCaptcha {
                challenge: challenge.clone(),
            }
        }
        _ => transient(ErrorCategory::CaptchaUnsolved, ctx, policy, now),
    }
}

fn classify_category(
    category: ErrorCategory,
    ctx: &AttemptContext,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Decision {
    match category.class() {
        ErrorClass::Transient => transient(category, ctx, policy, now),
        ErrorClass::Permanent | ErrorClass::Administrative => Decision::Failed { error: category },
        ErrorClass::Blocking => Decision::Skipped { error: category },
    }
}

fn transient(
    category: ErrorCategory,
    ctx: &AttemptContext,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Decision {
    let attempts = ctx.attempt_count + 1;
    if attempts >= ctx.max_attempts {
        return Decision::Failed { error: category };
    }
    let delay = chrono::Duration::from_std(policy.backoff(attempts))
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    Decision::RetryLater {
        next_eligible_at: now + delay,
        error: category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::outcome::CaptchaKind;

    fn ctx(attempt_count: i32) -> AttemptContext {
        AttemptContext {
            attempt_count,
            max_attempts: 3,
            captcha_attempts: 0,
            solver_available: false,
        }
    }

    fn challenge() -> CaptchaChallenge {
        CaptchaChallenge {
            kind: CaptchaKind::Recaptcha,
            site_key: Some("6Lc_site".to_string()),
            page_url: "https://dir.example/submit".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
        assert_eq!(policy.backoff(4), Duration::from_secs(40));
        assert_eq!(policy.backoff(7), Duration::from_secs(300));
        assert_eq!(policy.backoff(40), Duration::from_secs(300));
    }

    #[test]
    fn test_transient_retries_until_budget_spent() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let outcome = Outcome::failure(ErrorCategory::Timeout, "timed out", 100);

        assert_eq!(
            classify(&outcome, &ctx(0), &policy, now),
            Decision::RetryLater {
                next_eligible_at: now + chrono::Duration::seconds(5),
                error: ErrorCategory::Timeout,
            }
        );
        assert_eq!(
            classify(&outcome, &ctx(1), &policy, now),
            Decision::RetryLater {
                next_eligible_at: now + chrono::Duration::seconds(10),
                error: ErrorCategory::Timeout,
            }
        );
        assert_eq!(
            classify(&outcome, &ctx(2), &policy, now),
            Decision::Failed {
                error: ErrorCategory::Timeout
            }
        );
    }

    #[test]
    fn test_permanent_fails_immediately() {
        let outcome = Outcome::failure(ErrorCategory::DirectoryDefunct, "404", 10);
        let decision = classify(&outcome, &ctx(0), &RetryPolicy::default(), Utc::now());
        assert_eq!(
            decision,
            Decision::Failed {
                error: ErrorCategory::DirectoryDefunct
            }
        );
    }

    #[test]
    fn test_login_block_skips() {
        let outcome = Outcome::blocked(ErrorCategory::LoginRequired, 10);
        let decision = classify(&outcome, &ctx(0), &RetryPolicy::default(), Utc::now());
        assert_eq!(
            decision,
            Decision::Skipped {
                error: ErrorCategory::LoginRequired
            }
        );
        assert!(matches!(decision.transition(), Some(UnitTransition::Skip { .. })));
    }

    #[test]
    fn test_captcha_without_solver_skips() {
        let outcome = Outcome::captcha(challenge(), 10);
        let decision = classify(&outcome, &ctx(0), &RetryPolicy::default(), Utc::now());
        assert_eq!(
            decision,
            Decision::Skipped {
                error: ErrorCategory::CaptchaRequired
            }
        );
    }

    #[test]
    fn test_captcha_sub_budget() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let outcome = Outcome::captcha(challenge(), 10);
        let mut context = AttemptContext {
            solver_available: true,
            ..ctx(0)
        };

        let decision = classify(&outcome, &context, &policy, now);
        assert!(matches!(decision, Decision::RetryCaptcha { .. }));
        assert_eq!(decision.transition(), None);

        context.captcha_attempts = 2;
        assert_eq!(
            classify(&outcome, &context, &policy, now),
            Decision::RetryLater {
                next_eligible_at: now + chrono::Duration::seconds(5),
                error: ErrorCategory::CaptchaUnsolved,
            }
        );
    }

    #[test]
    fn test_success_carries_listing_url() {
        let outcome = Outcome::success(Some("https://dir.example/l/1".to_string()), 10);
        let decision = classify(&outcome, &ctx(2), &RetryPolicy::default(), Utc::now());
        assert_eq!(
            decision.transition(),
            Some(UnitTransition::Succeed {
                listing_url: Some("https://dir.example/l/1".to_string())
            })
        );
    }
}
