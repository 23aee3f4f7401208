#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assessment_engine::config::{Config, SessionConfig, SubmissionConfig};
use assessment_engine::error::SubmissionError;
use assessment_engine::models::{
    AttemptId, CodeSubmission, GradingResult, Payload, QuizAnswers, SubmissionOutcome,
    SubmissionRequest, TestCase,
};
use assessment_engine::services::session_service::SessionService;
use assessment_engine::services::timer::{AssessmentTimer, TimerFactory, TimerTrigger};
use assessment_engine::services::transport::SubmissionTransport;
use assessment_engine::services::AppState;
use assessment_engine::utils::time::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Frozen wall clock, so deadlines map to exact runtime instants.
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn epoch() -> Self {
        Self(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One scripted response of the fake grading service
pub enum Step {
    Reply(SubmissionOutcome),
    /// Hold the call for a while before replying
    Delayed(Duration, SubmissionOutcome),
}

#[derive(Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub request: SubmissionRequest,
}

/// Replays `Step`s in order, then succeeds. Records every call.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionTransport for ScriptedTransport {
    async fn send(&self, request: &SubmissionRequest) -> SubmissionOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            request: request.clone(),
        });
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(outcome)) => outcome,
            Some(Step::Delayed(delay, outcome)) => {
                tokio::time::sleep(delay).await;
                outcome
            }
            None => SubmissionOutcome::Success(graded(1.0)),
        }
    }
}

/// Timer factory whose timers only fire when the test says so.
#[derive(Default)]
pub struct ManualTimers {
    triggers: Mutex<Vec<(AttemptId, TimerTrigger)>>,
}

impl ManualTimers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fire the timer of `attempt_id`; `false` if it was cancelled or already fired.
    pub fn fire(&self, attempt_id: AttemptId) -> bool {
        let mut triggers = self.triggers.lock().unwrap();
        match triggers.iter().position(|(id, _)| *id == attempt_id) {
            Some(index) => triggers.remove(index).1.fire(),
            None => false,
        }
    }
}

impl TimerFactory for ManualTimers {
    fn start(&self, attempt_id: AttemptId, _deadline: Instant) -> AssessmentTimer {
        let (trigger, timer) = AssessmentTimer::channel();
        self.triggers.lock().unwrap().push((attempt_id, trigger));
        timer
    }
}

pub const BASE_DELAY: Duration = Duration::from_millis(1000);

pub fn test_config() -> Config {
    Config {
        grading: Default::default(),
        submission: SubmissionConfig {
            max_attempts: 3,
            base_delay_ms: BASE_DELAY.as_millis() as u64,
            attempt_timeout_ms: 5_000,
        },
        session: SessionConfig {
            time_up_notice_ms: 3_000,
            countdown_tick_ms: 1_000,
        },
    }
}

pub fn session_service(
    transport: Arc<dyn SubmissionTransport>,
    timers: Arc<dyn TimerFactory>,
    clock: Arc<FixedClock>,
) -> SessionService {
    let state = AppState::with_collaborators(test_config(), transport, timers, clock);
    SessionService::new(&state)
}

pub fn graded(score: f64) -> GradingResult {
    GradingResult {
        score,
        max_score: 1.0,
        passed: score >= 1.0,
        feedback: None,
        test_results: Vec::new(),
    }
}

pub fn retryable(message: &str) -> SubmissionOutcome {
    SubmissionOutcome::RetryableFailure(SubmissionError::Server {
        status: 503,
        message: message.to_string(),
    })
}

pub fn fatal(message: &str) -> SubmissionOutcome {
    SubmissionOutcome::FatalFailure(SubmissionError::Rejected {
        status: 422,
        message: message.to_string(),
    })
}

pub fn quiz_payload(choice: &str) -> Payload {
    Payload::Quiz(QuizAnswers {
        module_id: "module-1".to_string(),
        answers: BTreeMap::from([("q1".to_string(), vec![choice.to_string()])]),
    })
}

pub fn code_payload() -> Payload {
    Payload::Code(CodeSubmission {
        problem_id: "sum-two".to_string(),
        language: "python".to_string(),
        source: "print(sum(map(int, input().split())))".to_string(),
        test_cases: vec![TestCase {
            input: "1 2".to_string(),
            expected_output: "3".to_string(),
        }],
    })
}
