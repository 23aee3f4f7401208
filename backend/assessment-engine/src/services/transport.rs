use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::config::GradingConfig;
use crate::error::SubmissionError;
use crate::models::{GradingResult, SubmissionOutcome, SubmissionRequest};

/// One network try against the grading/execution service.
///
/// Implementations classify every failure as retryable or fatal and never
/// return `SubmissionOutcome::Cancelled`; deadlines are enforced by the caller.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn send(&self, request: &SubmissionRequest) -> SubmissionOutcome;
}

/// Structured error document of the grading service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
    retryable: Option<bool>,
}

pub struct HttpTransport {
    http_client: Client,
    endpoint: Url,
    api_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &GradingConfig) -> Result<Self> {
        let raw = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.submit_path.trim_start_matches('/')
        );
        let endpoint = Url::parse(&raw)
            .with_context(|| format!("Invalid grading endpoint: {}", raw))?;

        let http_client = Client::builder()
            .user_agent(concat!("assessment-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build grading HTTP client")?;

        Ok(Self {
            http_client,
            endpoint,
            api_token: config.api_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SubmissionTransport for HttpTransport {
    async fn send(&self, request: &SubmissionRequest) -> SubmissionOutcome {
        tracing::debug!(
            attempt_id = %request.attempt_id,
            attempt_number = request.attempt_number,
            "Calling grading service: {}",
            self.endpoint
        );

        let mut builder = self
            .http_client
            .post(self.endpoint.clone())
            .header("Idempotency-Key", request.attempt_id.to_string())
            .header("X-Attempt-Number", request.attempt_number)
            .json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<GradingResult>().await {
                Ok(result) => SubmissionOutcome::Success(result),
                Err(e) => SubmissionOutcome::FatalFailure(SubmissionError::InvalidResponse(
                    e.to_string(),
                )),
            };
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        classify_error_response(status, &body)
    }
}

fn classify_transport_error(err: &reqwest::Error) -> SubmissionOutcome {
    if err.is_builder() {
        return SubmissionOutcome::FatalFailure(SubmissionError::Rejected {
            status: 0,
            message: err.to_string(),
        });
    }
    SubmissionOutcome::RetryableFailure(SubmissionError::Network(err.to_string()))
}

/// Statuses worth another try: request timeout, too early, rate limited, 5xx.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429) || status.is_server_error()
}

/// Map a non-2xx response to an outcome. An explicit `retryable` flag in the
/// service's error document wins over the status class.
pub fn classify_error_response(status: StatusCode, body: &str) -> SubmissionOutcome {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let retryable = parsed
        .as_ref()
        .and_then(|b| b.retryable)
        .unwrap_or_else(|| is_retryable_status(status));
    let message = match parsed {
        Some(b) => b.error,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
        None => body.trim().to_string(),
    };

    if retryable {
        SubmissionOutcome::RetryableFailure(SubmissionError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        SubmissionOutcome::FatalFailure(SubmissionError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
