use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::outcome::{CaptchaChallenge, CaptchaKind};

/// External CAPTCHA solving service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve a challenge, returning the response token to submit with the form.
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String, SolverError>;
}

/// JSON client for a solving service exposing `POST /solve`.
pub struct HttpCaptchaSolver {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    kind: CaptchaKind,
    site_key: Option<&'a str>,
    page_url: &'a str,
}

#[derive(Deserialize)]
struct SolveResponse {
    token: Option<String>,
    error: Option<String>,
}

impl HttpCaptchaSolver {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, SolverError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/solve", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String, SolverError> {
        let request = SolveRequest {
            kind: challenge.kind,
            site_key: challenge.site_key.as_deref(),
            page_url: &challenge.page_url,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: SolveResponse = response.json().await?;
        match (body.token, body.error) {
            (Some(token), _) if !token.is_empty() => Ok(token),
            (_, Some(error)) => Err(SolverError::Unsolved(error)),
            _ => Err(SolverError::Unsolved("empty token".to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Solver could not solve challenge: {0}")]
    Unsolved(String),
}
