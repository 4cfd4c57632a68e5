use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::models::directory::DirectoryDescriptor;
use crate::models::job::BusinessProfile;
use crate::models::outcome::Outcome;
use crate::models::unit::{ErrorCategory, SubmissionUnit};
use crate::services::form::{self, FormError, FormMethod, ResponseVerdict};
use crate::services::rate_limit::{RateLimitError, RateLimiter};

/// Drives one submission attempt for a (job, directory) pair.
///
/// Implementations must not touch shared state; everything the engine needs
/// comes back in the [`Outcome`].
#[async_trait]
pub trait SubmissionWorker: Send + Sync {
    async fn process(
        &self,
        unit: &SubmissionUnit,
        profile: &BusinessProfile,
        directory: &DirectoryDescriptor,
        captcha_token: Option<&str>,
    ) -> Outcome;
}

/// Plain HTTP form submission: fetch the page, fill the mapped fields, post.
pub struct HttpFormWorker {
    http: Client,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl HttpFormWorker {
    pub fn new(rate_limiter: Arc<dyn RateLimiter>, timeout: Duration) -> Result<Self, WorkerError> {
        let http = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(concat!("directory-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, rate_limiter })
    }

    async fn attempt(
        &self,
        profile: &BusinessProfile,
        directory: &DirectoryDescriptor,
        captcha_token: Option<&str>,
    ) -> Result<Outcome, WorkerError> {
        let page_url = Url::parse(&directory.submission_url)
            .map_err(|_| WorkerError::BadUrl(directory.submission_url.clone()))?;

        let class = directory.capabilities.rate_limit_class;
        self.rate_limiter.wait_turn(&directory.id, class).await?;

        let response = self.http.get(page_url).send().await?;
        if let Some(category) = status_category(response.status()) {
            return Ok(Outcome::failure(
                category,
                format!("submission page returned {}", response.status()),
                0,
            ));
        }
        let page_url = response.url().clone();
        let html = response.text().await?;

        let inspection = form::inspect_page(&html, page_url.as_str());
        if inspection.login_required {
            return Ok(Outcome::blocked(ErrorCategory::LoginRequired, 0));
        }
        if let (Some(challenge), None) = (inspection.captcha, captcha_token) {
            return Ok(Outcome::captcha(challenge, 0));
        }

        let submission =
            form::build_submission(&html, &page_url, directory, profile, captcha_token)?;
        tracing::debug!(
            directory_id = %directory.id,
            action = %submission.action,
            fields = submission.fields.len(),
            "Submitting directory form"
        );

        // The submit is a second hit on the same directory
        self.rate_limiter.wait_turn(&directory.id, class).await?;
        let request = match submission.method {
            FormMethod::Post => self.http.post(submission.action).form(&submission.fields),
            FormMethod::Get => self.http.get(submission.action).query(&submission.fields),
        };
        let response = request.send().await?;
        if let Some(category) = status_category(response.status()) {
            return Ok(Outcome::failure(
                category,
                format!("form submission returned {}", response.status()),
                0,
            ));
        }
        let final_url = response.url().to_string();
        let html = response.text().await?;

        Ok(match form::classify_response(&html, &final_url) {
            ResponseVerdict::Accepted { listing_url } => Outcome::success(listing_url, 0),
            ResponseVerdict::ManualReview => {
                Outcome::blocked(ErrorCategory::ManualReviewRequired, 0)
            }
            ResponseVerdict::Rejected { message } => {
                Outcome::failure(ErrorCategory::ValidationRejected, message, 0)
            }
            ResponseVerdict::Unconfirmed => Outcome::failure(
                ErrorCategory::Unconfirmed,
                "no confirmation found after submit",
                0,
            ),
        })
    }
}

#[async_trait]
impl SubmissionWorker for HttpFormWorker {
    async fn process(
        &self,
        unit: &SubmissionUnit,
        profile: &BusinessProfile,
        directory: &DirectoryDescriptor,
        captcha_token: Option<&str>,
    ) -> Outcome {
        let start = Instant::now();
        let mut outcome = match self.attempt(profile, directory, captcha_token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(
                    unit_id = %unit.id,
                    directory_id = %directory.id,
                    error = %e,
                    "Submission attempt errored"
                );
                Outcome::failure(e.category(), e.to_string(), 0)
            }
        };
        outcome.duration_ms = start.elapsed().as_millis() as i64;
        outcome
    }
}

/// Error category for an HTTP status, `None` when the status is usable.
pub fn status_category(status: StatusCode) -> Option<ErrorCategory> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(ErrorCategory::RateLimited),
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(ErrorCategory::DirectoryDefunct),
        s if s.is_server_error() => Some(ErrorCategory::ServerError),
        s if s.is_client_error() => Some(ErrorCategory::ValidationRejected),
        _ => None,
    }
}

/// Internal failures of an HTTP attempt, folded into an [`Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Form could not be filled: {0}")]
    Form(#[from] FormError),

    #[error("Rate limiter unavailable: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Invalid submission URL {0:?}")]
    BadUrl(String),
}

impl WorkerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkerError::Http(e) if e.is_timeout() => ErrorCategory::Timeout,
            WorkerError::Http(e) => e
                .status()
                .and_then(status_category)
                .unwrap_or(ErrorCategory::Network),
            WorkerError::Form(_) => ErrorCategory::ValidationRejected,
            WorkerError::RateLimit(_) => ErrorCategory::Network,
            WorkerError::BadUrl(_) => ErrorCategory::DirectoryDefunct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_category(StatusCode::OK), None);
        assert_eq!(status_category(StatusCode::FOUND), None);
        assert_eq!(
            status_category(StatusCode::TOO_MANY_REQUESTS),
            Some(ErrorCategory::RateLimited)
        );
        assert_eq!(
            status_category(StatusCode::GONE),
            Some(ErrorCategory::DirectoryDefunct)
        );
        assert_eq!(
            status_category(StatusCode::BAD_GATEWAY),
            Some(ErrorCategory::ServerError)
        );
        assert_eq!(
            status_category(StatusCode::UNPROCESSABLE_ENTITY),
            Some(ErrorCategory::ValidationRejected)
        );
    }

    #[test]
    fn test_form_errors_are_permanent() {
        let err = WorkerError::Form(FormError::NoForm);
        assert_eq!(err.category(), ErrorCategory::ValidationRejected);
        assert_eq!(
            WorkerError::BadUrl("nope".to_string()).category(),
            ErrorCategory::DirectoryDefunct
        );
    }
}
