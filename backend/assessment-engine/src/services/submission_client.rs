use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::transport::SubmissionTransport;
use crate::config::SubmissionConfig;
use crate::error::SubmissionError;
use crate::metrics::track_submission_attempt;
use crate::models::{SubmissionOutcome, SubmissionRequest};
use crate::utils::retry::{RetryDecision, RetryPolicy};

/// Delivers one finalization to the grading service, absorbing transient
/// failures according to a [`RetryPolicy`].
///
/// Guarantees per `submit` call:
/// - no new try after a fatal failure or after cancellation,
/// - at most `policy.max_attempts` tries,
/// - every try carries the same attempt id and payload.
pub struct SubmissionClient {
    transport: Arc<dyn SubmissionTransport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl SubmissionClient {
    pub fn new(
        transport: Arc<dyn SubmissionTransport>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn SubmissionTransport>, config: &SubmissionConfig) -> Self {
        Self::new(
            transport,
            RetryPolicy::from(config),
            Duration::from_millis(config.attempt_timeout_ms),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Drive `request` to a final outcome. Exhausted retries come back as
    /// `RetryableFailure(SubmissionError::Exhausted { .. })`.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> SubmissionOutcome {
        let mut request = request;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(&request);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&request),
                outcome = self.attempt(&request) => outcome,
            };

            match self.policy.next(request.attempt_number, &outcome) {
                RetryDecision::GiveUp => return self.finish(&request, outcome),
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        attempt_id = %request.attempt_id,
                        attempt_number = request.attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        "Submission attempt failed ({}), retrying",
                        failure_reason(&outcome)
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.cancelled(&request),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    request = request.next_attempt();
                }
            }
        }
    }

    async fn attempt(&self, request: &SubmissionRequest) -> SubmissionOutcome {
        track_submission_attempt(async {
            match tokio::time::timeout(self.attempt_timeout, self.transport.send(request)).await {
                Ok(outcome) => outcome,
                Err(_) => SubmissionOutcome::RetryableFailure(SubmissionError::Timeout(
                    self.attempt_timeout,
                )),
            }
        })
        .await
    }

    fn finish(&self, request: &SubmissionRequest, outcome: SubmissionOutcome) -> SubmissionOutcome {
        match outcome {
            SubmissionOutcome::RetryableFailure(last) => {
                tracing::warn!(
                    attempt_id = %request.attempt_id,
                    attempts = request.attempt_number,
                    "Submission retries exhausted: {}",
                    last
                );
                SubmissionOutcome::RetryableFailure(SubmissionError::Exhausted {
                    attempts: request.attempt_number,
                    last: Box::new(last),
                })
            }
            SubmissionOutcome::FatalFailure(err) => {
                tracing::warn!(
                    attempt_id = %request.attempt_id,
                    attempt_number = request.attempt_number,
                    "Submission rejected: {}",
                    err
                );
                SubmissionOutcome::FatalFailure(err)
            }
            other => {
                tracing::info!(
                    attempt_id = %request.attempt_id,
                    attempt_number = request.attempt_number,
                    "Submission delivered"
                );
                other
            }
        }
    }

    fn cancelled(&self, request: &SubmissionRequest) -> SubmissionOutcome {
        tracing::debug!(
            attempt_id = %request.attempt_id,
            attempt_number = request.attempt_number,
            "Submission cancelled"
        );
        SubmissionOutcome::Cancelled
    }
}

fn failure_reason(outcome: &SubmissionOutcome) -> String {
    match outcome {
        SubmissionOutcome::RetryableFailure(e) | SubmissionOutcome::FatalFailure(e) => {
            e.to_string()
        }
        other => other.label().to_string(),
    }
}
