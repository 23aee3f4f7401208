use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::AttemptId;

/// Produces one countdown per attempt. Swapped for a manually fired
/// implementation in tests.
pub trait TimerFactory: Send + Sync {
    fn start(&self, attempt_id: AttemptId, deadline: Instant) -> AssessmentTimer;
}

/// Firing side of an [`AssessmentTimer`]. Consumed on use, so an attempt
/// can be notified at most once.
#[derive(Debug)]
pub struct TimerTrigger {
    sender: oneshot::Sender<Instant>,
}

impl TimerTrigger {
    /// Returns `false` when the timer was already cancelled or dropped.
    pub fn fire(self) -> bool {
        self.sender.send(Instant::now()).is_ok()
    }
}

/// Single cancellable expiry notification for one attempt.
#[derive(Debug)]
pub struct AssessmentTimer {
    receiver: Option<oneshot::Receiver<Instant>>,
    cancel: CancellationToken,
}

impl AssessmentTimer {
    pub fn channel() -> (TimerTrigger, AssessmentTimer) {
        let (sender, receiver) = oneshot::channel();
        (
            TimerTrigger { sender },
            AssessmentTimer {
                receiver: Some(receiver),
                cancel: CancellationToken::new(),
            },
        )
    }

    /// Token the driving task watches to stop early.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent: cancelling a fired or cancelled timer does nothing.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.receiver = None;
    }

    pub fn is_armed(&self) -> bool {
        self.receiver.is_some() && !self.cancel.is_cancelled()
    }

    /// Resolves once with the expiry instant. `None` if the timer was
    /// cancelled, already consumed, or its driver went away.
    pub async fn expired(&mut self) -> Option<Instant> {
        let receiver = self.receiver.as_mut()?;
        let fired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            fired = receiver => fired.ok(),
        };
        self.receiver = None;
        if self.cancel.is_cancelled() {
            return None;
        }
        fired
    }
}

impl Drop for AssessmentTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Real countdown backed by `tokio::time::sleep_until`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimerFactory;

impl TimerFactory for TokioTimerFactory {
    fn start(&self, attempt_id: AttemptId, deadline: Instant) -> AssessmentTimer {
        let (trigger, timer) = AssessmentTimer::channel();
        let cancel = timer.cancellation();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::trace!(%attempt_id, "Timer cancelled before expiry");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if trigger.fire() {
                        tracing::debug!(%attempt_id, "Timer expired");
                    }
                }
            }
        });

        timer
    }
}
