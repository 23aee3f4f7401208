use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::models::SubmissionOutcome;

lazy_static! {
    // Session Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_sessions_total",
        "Total number of assessment session transitions by resulting status",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "assessment_sessions_active",
        "Number of sessions currently alive"
    )
    .unwrap();

    pub static ref FINALIZE_TRIGGERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "finalize_triggers_total",
        "Finalization triggers by source and whether the guard accepted them",
        &["trigger", "accepted"]
    )
    .unwrap();

    // Submission Metrics
    pub static ref SUBMISSION_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submission_attempts_total",
        "Total number of network attempts to the grading service",
        &["result"]
    )
    .unwrap();

    pub static ref SUBMISSION_ATTEMPT_DURATION_SECONDS: Histogram = register_histogram!(
        "submission_attempt_duration_seconds",
        "Duration of a single grading service attempt in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track one grading attempt with metrics
pub async fn track_submission_attempt<F>(future: F) -> SubmissionOutcome
where
    F: std::future::Future<Output = SubmissionOutcome>,
{
    let start = std::time::Instant::now();
    let outcome = future.await;
    let duration = start.elapsed().as_secs_f64();

    SUBMISSION_ATTEMPTS_TOTAL
        .with_label_values(&[outcome.label()])
        .inc();
    SUBMISSION_ATTEMPT_DURATION_SECONDS.observe(duration);

    outcome
}

/// Record a finalize trigger and whether it won the guard
pub fn record_finalize_trigger(trigger: &str, accepted: bool) {
    let accepted = if accepted { "true" } else { "false" };
    FINALIZE_TRIGGERS_TOTAL
        .with_label_values(&[trigger, accepted])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Touch every metric so registration runs
        let _ = SESSIONS_TOTAL.with_label_values(&["active"]).get();
        let _ = SESSIONS_ACTIVE.get();
    }

    #[tokio::test]
    async fn test_track_submission_attempt_counts_result() {
        let before = SUBMISSION_ATTEMPTS_TOTAL
            .with_label_values(&["cancelled"])
            .get();

        let outcome = track_submission_attempt(async { SubmissionOutcome::Cancelled }).await;

        assert_eq!(outcome, SubmissionOutcome::Cancelled);
        assert!(
            SUBMISSION_ATTEMPTS_TOTAL
                .with_label_values(&["cancelled"])
                .get()
                > before
        );
    }

    #[test]
    fn test_render_metrics() {
        record_finalize_trigger("learner", true);

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("finalize_triggers_total"));
    }
}
