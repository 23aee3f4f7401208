use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AttemptId;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub attempt_id: AttemptId,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

/// The single expiry notification of an attempt's timer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub attempt_id: AttemptId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// How long the "time is up" notice stays on screen
    pub notice_seconds: u32,
}

impl TimeExpired {
    pub fn new(attempt_id: AttemptId, timestamp: DateTime<Utc>, notice_seconds: u32) -> Self {
        Self {
            attempt_id,
            timestamp,
            message: "Time limit exceeded".to_string(),
            notice_seconds,
        }
    }
}

impl TimerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }
}
