//! Timed assessment submission engine.
//!
//! An [`AssessmentSession`] owns one learner attempt: it races a deadline
//! timer against the learner's own submit, finalizes exactly once, and
//! delivers the frozen payload through a retrying [`SubmissionClient`].

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use error::{SessionError, SubmissionError};
pub use services::session_service::{AssessmentSession, SessionService};
pub use services::submission_client::SubmissionClient;
pub use services::AppState;
