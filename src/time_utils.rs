//! Time helpers shared by the reducer, the screens and the timers.

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

/// Default refetch cadence (30 minutes).
pub const DEFAULT_REFETCH_MINUTES: i64 = 30;

/// Whole minutes elapsed between `then` and `now`, never negative.
pub fn minutes_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_minutes().max(0)
}

/// Human label for a refresh timestamp, e.g. "3 minutes ago".
pub fn format_time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = minutes_since(then, now);
    match minutes {
        0 => "just now".to_string(),
        1 => "1 minute ago".to_string(),
        m if m < 60 => format!("{} minutes ago", m),
        m if m < 120 => "1 hour ago".to_string(),
        m if m < 60 * 24 => format!("{} hours ago", m / 60),
        m if m < 60 * 48 => "1 day ago".to_string(),
        m => format!("{} days ago", m / (60 * 24)),
    }
}

/// True when there was no fetch yet or the last one is at least `interval` old.
///
/// Advisory only: the fetch timer is what actually triggers refetches.
pub fn should_fetch(last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last_fetch {
        Some(last) => now - last >= interval,
        None => true,
    }
}

/// Time left until the next scheduled fetch; zero when one is already due.
pub fn time_until_next_fetch(
    last_fetch: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Duration {
    match last_fetch {
        Some(last) => {
            let remaining = interval - (now - last);
            if remaining < Duration::zero() {
                Duration::zero()
            } else {
                remaining
            }
        }
        None => Duration::zero(),
    }
}

/// Wall-clock time that advances with the tokio clock.
///
/// Anchored once, so timestamps taken from it stay monotonic and follow
/// paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            wall: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.wall + Duration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| Duration::zero())
    }
}
