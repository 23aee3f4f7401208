use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock source. Injected so deadlines can be tested against a fixed "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Map an absolute deadline onto the runtime's monotonic clock.
/// Deadlines in the past map to "now".
pub fn deadline_instant(clock: &dyn Clock, deadline: DateTime<Utc>) -> Instant {
    let remaining = (deadline - clock.now()).to_std().unwrap_or_default();
    Instant::now() + remaining
}

/// Whole seconds left until `deadline`, rounded up.
pub fn remaining_seconds(deadline: Instant) -> u32 {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixed(DateTime<Utc>);

    impl Clock for Fixed {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_maps_to_now() {
        let now = Utc::now();
        let clock = Fixed(now);
        let start = Instant::now();

        assert_eq!(deadline_instant(&clock, now - chrono::Duration::seconds(5)), start);
        assert_eq!(
            deadline_instant(&clock, now + chrono::Duration::seconds(5)),
            start + Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_seconds_rounds_up() {
        let deadline = Instant::now() + Duration::from_millis(1500);
        assert_eq!(remaining_seconds(deadline), 2);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(remaining_seconds(deadline), 0);
    }
}
