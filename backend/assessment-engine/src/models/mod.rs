use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

pub mod outcome;
pub mod timer;

pub use outcome::{GradingResult, SubmissionOutcome, TestCaseResult};
pub use timer::{TimeExpired, TimerEvent, TimerTick};

/// Opaque identifier of one learner attempt. Sent to the grading service as
/// the idempotency key, so every retry of one attempt shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the learner hands in: MCQ answers or a code bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Quiz(QuizAnswers),
    Code(CodeSubmission),
}

impl Validate for Payload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Payload::Quiz(answers) => answers.validate(),
            Payload::Code(code) => code.validate(),
        }
    }
}

/// Selected options per question of one module quiz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct QuizAnswers {
    #[validate(length(min = 1, message = "Module id must not be empty"))]
    pub module_id: String,

    /// question id -> selected option ids
    #[serde(default)]
    pub answers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CodeSubmission {
    #[validate(length(min = 1, message = "Problem id must not be empty"))]
    pub problem_id: String,

    #[validate(length(
        min = 1,
        max = 32,
        message = "Language must be between 1 and 32 characters"
    ))]
    pub language: String,

    #[validate(length(max = 65536, message = "Source must not exceed 65536 characters"))]
    pub source: String,

    #[validate(length(max = 100, message = "At most 100 test cases per run"))]
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Why an attempt left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeTrigger {
    Learner,
    TimerExpired,
    ManualRetry,
}

impl FinalizeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::Learner => "learner",
            FinalizeTrigger::TimerExpired => "timer_expired",
            FinalizeTrigger::ManualRetry => "manual_retry",
        }
    }
}

/// Attempt lifecycle: `Active -> Finalizing -> {Completed | Failed}`.
/// `Failed` may re-enter `Finalizing` only through an explicit retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttemptState {
    Active,
    Finalizing { trigger: FinalizeTrigger },
    Completed { result: GradingResult },
    Failed { reason: String },
}

impl AttemptState {
    pub fn phase(&self) -> AttemptPhase {
        match self {
            AttemptState::Active => AttemptPhase::Active,
            AttemptState::Finalizing { .. } => AttemptPhase::Finalizing,
            AttemptState::Completed { .. } => AttemptPhase::Completed,
            AttemptState::Failed { .. } => AttemptPhase::Failed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AttemptState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Completed { .. } | AttemptState::Failed { .. }
        )
    }
}

/// Payload-free view of [`AttemptState`], used in errors and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Active,
    Finalizing,
    Completed,
    Failed,
}

impl AttemptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptPhase::Active => "active",
            AttemptPhase::Finalizing => "finalizing",
            AttemptPhase::Completed => "completed",
            AttemptPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One learner's timed pass at one assessment.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub deadline: DateTime<Utc>,
    /// Replaced wholesale on edit; shared read-only with requests once finalizing.
    pub payload: Arc<Payload>,
    pub state: AttemptState,
}

impl Attempt {
    pub fn new(deadline: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            attempt_id: AttemptId::new(),
            deadline,
            payload: Arc::new(payload),
            state: AttemptState::Active,
        }
    }
}

/// A single transmission of an attempt's frozen payload.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRequest {
    pub attempt_id: AttemptId,
    /// 1-based network try within one finalization
    pub attempt_number: u32,
    pub payload: Arc<Payload>,
}

impl SubmissionRequest {
    pub fn first(attempt_id: AttemptId, payload: Arc<Payload>) -> Self {
        Self {
            attempt_id,
            attempt_number: 1,
            payload,
        }
    }

    /// Same logical content, next try.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt_id: self.attempt_id,
            attempt_number: self.attempt_number + 1,
            payload: Arc::clone(&self.payload),
        }
    }
}

/// What subscribers of a session observe.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub attempt_id: AttemptId,
    pub deadline: DateTime<Utc>,
    #[serde(flatten)]
    pub state: AttemptState,
    /// Finalizing submissions issued so far (1 unless the learner retried)
    pub finalizations: u32,
    /// Set when the timer ended the attempt; drives the "time is up" notice.
    pub time_up: Option<TimeExpired>,
}

impl SessionSnapshot {
    pub fn phase(&self) -> AttemptPhase {
        self.state.phase()
    }
}
