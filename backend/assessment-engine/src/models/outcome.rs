use serde::{Deserialize, Serialize};

use crate::error::SubmissionError;

/// Result of one network attempt, or of a whole client invocation.
///
/// Transports only ever produce the first three variants; `Cancelled` comes
/// from `SubmissionClient` when the session is torn down mid-flight.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Success(GradingResult),
    RetryableFailure(SubmissionError),
    FatalFailure(SubmissionError),
    Cancelled,
}

impl SubmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Success(_) => "success",
            SubmissionOutcome::RetryableFailure(_) => "retryable",
            SubmissionOutcome::FatalFailure(_) => "fatal",
            SubmissionOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success(_))
    }
}

/// Graded answers or execution report returned by the grading service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub passed: bool,
    pub feedback: Option<String>,
    #[serde(default)]
    pub test_results: Vec<TestCaseResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub actual_output: Option<String>,
}
