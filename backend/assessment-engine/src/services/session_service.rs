use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::submission_client::SubmissionClient;
use super::timer::{AssessmentTimer, TimerFactory};
use super::AppState;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::metrics::{record_finalize_trigger, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::{
    Attempt, AttemptId, AttemptPhase, AttemptState, FinalizeTrigger, Payload, SessionSnapshot,
    SubmissionOutcome, SubmissionRequest, TimeExpired, TimerEvent, TimerTick,
};
use crate::utils::time::{deadline_instant, remaining_seconds, Clock};

/// Starts timed assessment sessions with shared collaborators.
pub struct SessionService {
    client: Arc<SubmissionClient>,
    timers: Arc<dyn TimerFactory>,
    clock: Arc<dyn Clock>,
    settings: SessionConfig,
}

impl SessionService {
    pub fn new(state: &AppState) -> Self {
        Self {
            client: Arc::new(state.submission_client()),
            timers: Arc::clone(&state.timers),
            clock: Arc::clone(&state.clock),
            settings: state.config.session.clone(),
        }
    }

    /// Open an attempt and arm its timer. Must be called inside a Tokio runtime.
    ///
    /// A deadline in the past is accepted: the timer fires right away and the
    /// attempt is finalized with whatever `initial` holds.
    pub fn start_session(
        &self,
        deadline: DateTime<Utc>,
        initial: Payload,
    ) -> SessionResult<AssessmentSession> {
        initial.validate()?;

        let attempt = Attempt::new(deadline, initial);
        let attempt_id = attempt.attempt_id;
        let deadline_at = deadline_instant(self.clock.as_ref(), deadline);
        let timer = self.timers.start(attempt_id, deadline_at);

        let (updates_tx, updates_rx) = watch::channel(SessionSnapshot {
            attempt_id,
            deadline,
            state: AttemptState::Active,
            finalizations: 0,
            time_up: None,
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let actor = SessionActor {
            attempt,
            timer,
            client: Arc::clone(&self.client),
            clock: Arc::clone(&self.clock),
            notice_seconds: notice_seconds(self.settings.time_up_notice()),
            in_flight: None,
            finalizations: 0,
            time_up: None,
            updates: updates_tx,
        };
        let actor = tokio::spawn(actor.run(commands_rx, shutdown.clone()));

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        SESSIONS_ACTIVE.inc();

        tracing::info!("Session started: attempt={}, deadline={}", attempt_id, deadline);

        Ok(AssessmentSession {
            attempt_id,
            deadline,
            deadline_at,
            commands: commands_tx,
            updates: updates_rx,
            shutdown,
            actor: Some(actor),
            clock: Arc::clone(&self.clock),
            countdown_tick: self.settings.countdown_tick(),
            notice_seconds: notice_seconds(self.settings.time_up_notice()),
        })
    }
}

fn notice_seconds(notice: Duration) -> u32 {
    u32::try_from(notice.as_millis().div_ceil(1000)).unwrap_or(u32::MAX)
}

enum Command {
    UpdatePayload {
        payload: Payload,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    SubmitNow {
        reply: oneshot::Sender<bool>,
    },
    Retry {
        reply: oneshot::Sender<SessionResult<()>>,
    },
}

/// Presentation-layer handle of one attempt. Dropping it tears the session down.
pub struct AssessmentSession {
    attempt_id: AttemptId,
    deadline: DateTime<Utc>,
    deadline_at: Instant,
    commands: mpsc::UnboundedSender<Command>,
    updates: watch::Receiver<SessionSnapshot>,
    shutdown: CancellationToken,
    actor: Option<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
    countdown_tick: Duration,
    notice_seconds: u32,
}

impl AssessmentSession {
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.clone()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline_at.saturating_duration_since(Instant::now())
    }

    /// Replace the learner's answers. Rejected once finalization has begun.
    pub async fn update_payload(&self, payload: Payload) -> SessionResult<()> {
        payload.validate()?;
        self.request(|reply| Command::UpdatePayload { payload, reply })
            .await?
    }

    /// Finalize now. `Ok(false)` means another trigger got there first.
    pub async fn submit_now(&self) -> SessionResult<bool> {
        self.request(|reply| Command::SubmitNow { reply }).await
    }

    /// Learner-initiated resubmission of a failed attempt.
    pub async fn retry(&self) -> SessionResult<()> {
        self.request(|reply| Command::Retry { reply }).await?
    }

    /// Resolves at the next `Completed` or `Failed` state.
    pub async fn wait_for_outcome(&self) -> SessionResult<SessionSnapshot> {
        let mut updates = self.updates.clone();
        let snapshot = updates
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Cancel the timer and any in-flight submission, then wait for the
    /// session task to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                tracing::warn!(
                    "Session task ended abnormally: attempt={}, error={}",
                    self.attempt_id,
                    e
                );
            }
        }
    }

    /// Countdown for the quiz screen: one tick per interval, then a single
    /// `TimeExpired`. Ends early once the attempt leaves `Active` before time is up.
    pub fn countdown(&self) -> impl Stream<Item = TimerEvent> + Send + 'static {
        let state = Countdown {
            attempt_id: self.attempt_id,
            deadline: self.deadline_at,
            tick: self.countdown_tick,
            total: remaining_seconds(self.deadline_at),
            clock: Arc::clone(&self.clock),
            updates: self.updates.clone(),
            notice_seconds: self.notice_seconds,
            expired_sent: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.expired_sent {
                return None;
            }

            let (active, timed_out) = {
                let snapshot = state.updates.borrow();
                (snapshot.state.is_active(), snapshot.time_up.is_some())
            };
            let remaining = remaining_seconds(state.deadline);

            if remaining == 0 {
                if !active && !timed_out {
                    return None;
                }
                state.expired_sent = true;
                let expired =
                    TimeExpired::new(state.attempt_id, state.clock.now(), state.notice_seconds);
                return Some((TimerEvent::TimeExpired(expired), state));
            }
            if !active {
                return None;
            }

            let tick = TimerTick {
                attempt_id: state.attempt_id,
                remaining_seconds: remaining,
                elapsed_seconds: state.total.saturating_sub(remaining),
                total_seconds: state.total,
                timestamp: state.clock.now(),
            };

            let next = std::cmp::min(Instant::now() + state.tick, state.deadline);
            tokio::time::sleep_until(next).await;

            Some((TimerEvent::TimerTick(tick), state))
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

impl Drop for AssessmentSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Countdown {
    attempt_id: AttemptId,
    deadline: Instant,
    tick: Duration,
    total: u32,
    clock: Arc<dyn Clock>,
    updates: watch::Receiver<SessionSnapshot>,
    notice_seconds: u32,
    expired_sent: bool,
}

struct InFlight {
    handle: JoinHandle<SubmissionOutcome>,
    cancel: CancellationToken,
}

/// Owns the attempt. Every trigger reaches it through one event loop, so the
/// `Active` check and the move to `Finalizing` happen without interleaving.
struct SessionActor {
    attempt: Attempt,
    timer: AssessmentTimer,
    client: Arc<SubmissionClient>,
    clock: Arc<dyn Clock>,
    notice_seconds: u32,
    in_flight: Option<InFlight>,
    finalizations: u32,
    time_up: Option<TimeExpired>,
    updates: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                fired = self.timer.expired(), if self.timer.is_armed() => {
                    if fired.is_some() {
                        self.on_timer_expired();
                    }
                }
                joined = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.on_submission_resolved(joined);
                }
            }
        }

        self.teardown().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::UpdatePayload { payload, reply } => {
                let result = if self.attempt.state.is_active() {
                    self.attempt.payload = Arc::new(payload);
                    tracing::debug!("Payload updated: attempt={}", self.attempt.attempt_id);
                    Ok(())
                } else {
                    tracing::debug!(
                        "Payload edit ignored: attempt={}, state={}",
                        self.attempt.attempt_id,
                        self.phase()
                    );
                    Err(SessionError::PayloadFrozen(self.phase()))
                };
                let _ = reply.send(result);
            }
            Command::SubmitNow { reply } => {
                let accepted = self.try_finalize(FinalizeTrigger::Learner);
                let _ = reply.send(accepted);
            }
            Command::Retry { reply } => {
                let result = match self.phase() {
                    AttemptPhase::Failed => {
                        record_finalize_trigger(FinalizeTrigger::ManualRetry.as_str(), true);
                        self.start_submission(FinalizeTrigger::ManualRetry);
                        Ok(())
                    }
                    phase => Err(SessionError::NotRetryable(phase)),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn on_timer_expired(&mut self) {
        if self.attempt.state.is_active() {
            self.time_up = Some(TimeExpired::new(
                self.attempt.attempt_id,
                self.clock.now(),
                self.notice_seconds,
            ));
        }
        self.try_finalize(FinalizeTrigger::TimerExpired);
    }

    /// The single-entry guard: only the first trigger seen in `Active` wins.
    fn try_finalize(&mut self, trigger: FinalizeTrigger) -> bool {
        if !self.attempt.state.is_active() {
            record_finalize_trigger(trigger.as_str(), false);
            tracing::debug!(
                "Finalize trigger ignored: attempt={}, trigger={}, state={}",
                self.attempt.attempt_id,
                trigger.as_str(),
                self.phase()
            );
            return false;
        }

        record_finalize_trigger(trigger.as_str(), true);
        self.timer.cancel();
        self.start_submission(trigger);
        true
    }

    fn start_submission(&mut self, trigger: FinalizeTrigger) {
        self.attempt.state = AttemptState::Finalizing { trigger };
        self.finalizations += 1;

        let request =
            SubmissionRequest::first(self.attempt.attempt_id, Arc::clone(&self.attempt.payload));
        let cancel = CancellationToken::new();
        let client = Arc::clone(&self.client);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { client.submit(request, &token).await });
        self.in_flight = Some(InFlight { handle, cancel });

        SESSIONS_TOTAL.with_label_values(&["finalizing"]).inc();
        tracing::info!(
            "Finalizing attempt: attempt={}, trigger={}, submission={}",
            self.attempt.attempt_id,
            trigger.as_str(),
            self.finalizations
        );
        self.publish();
    }

    fn on_submission_resolved(&mut self, joined: Result<SubmissionOutcome, JoinError>) {
        let state = match joined {
            Ok(SubmissionOutcome::Success(result)) => AttemptState::Completed { result },
            Ok(SubmissionOutcome::RetryableFailure(e)) | Ok(SubmissionOutcome::FatalFailure(e)) => {
                AttemptState::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(SubmissionOutcome::Cancelled) => {
                tracing::debug!("Submission cancelled: attempt={}", self.attempt.attempt_id);
                return;
            }
            Err(e) => {
                tracing::error!(
                    "Submission task failed: attempt={}, error={}",
                    self.attempt.attempt_id,
                    e
                );
                AttemptState::Failed {
                    reason: "submission was interrupted".to_string(),
                }
            }
        };

        self.attempt.state = state;
        let phase = self.phase();
        SESSIONS_TOTAL.with_label_values(&[phase.as_str()]).inc();
        match &self.attempt.state {
            AttemptState::Failed { reason } => tracing::warn!(
                "Attempt failed: attempt={}, reason={}",
                self.attempt.attempt_id,
                reason
            ),
            _ => tracing::info!("Attempt completed: attempt={}", self.attempt.attempt_id),
        }
        self.publish();
    }

    async fn teardown(mut self) {
        self.timer.cancel();

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
            match in_flight.handle.await {
                Ok(outcome) => tracing::debug!(
                    "In-flight submission stopped: attempt={}, outcome={}",
                    self.attempt.attempt_id,
                    outcome.label()
                ),
                Err(e) => tracing::warn!(
                    "In-flight submission ended abnormally: attempt={}, error={}",
                    self.attempt.attempt_id,
                    e
                ),
            }
        }

        SESSIONS_TOTAL.with_label_values(&["closed"]).inc();
        SESSIONS_ACTIVE.dec();
        tracing::info!(
            "Session closed: attempt={}, state={}",
            self.attempt.attempt_id,
            self.phase()
        );
    }

    fn phase(&self) -> AttemptPhase {
        self.attempt.state.phase()
    }

    fn publish(&self) {
        self.updates.send_replace(SessionSnapshot {
            attempt_id: self.attempt.attempt_id,
            deadline: self.attempt.deadline,
            state: self.attempt.state.clone(),
            finalizations: self.finalizations,
            time_up: self.time_up.clone(),
        });
    }
}

async fn join_in_flight(
    in_flight: &mut Option<InFlight>,
) -> Result<SubmissionOutcome, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}
