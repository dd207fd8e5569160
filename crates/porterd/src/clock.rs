use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall-clock source for cooldown and timeout decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time elapsed from `since` to `now`; zero if the clock went backwards.
pub fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
