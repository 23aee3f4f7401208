use std::time::Duration;

use thiserror::Error;

use crate::models::AttemptPhase;

/// Why a single delivery attempt (or the whole delivery) failed.
///
/// The `Display` text is what the learner sees next to the retry button,
/// so keep messages short and free of internals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("grading service did not answer within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("grading service error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("submission rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid grading response: {0}")]
    InvalidResponse(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<SubmissionError>,
    },
}

/// Errors returned to the presentation layer by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("payload is frozen, attempt is {0}")]
    PayloadFrozen(AttemptPhase),

    #[error("attempt cannot be retried while it is {0}")]
    NotRetryable(AttemptPhase),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] validator::ValidationErrors),
}

pub type SessionResult<T> = Result<T, SessionError>;
