//! Deadline helpers for blocking waits.

use std::time::{Duration, Instant};

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant, now: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(now)
        .filter(|remaining| !remaining.is_zero())
}

/// How long to sleep before the next poll: one `interval`, clipped to the deadline.
pub fn next_poll_delay(deadline: Instant, now: Instant, interval: Duration) -> Option<Duration> {
    remaining_budget(deadline, now).map(|remaining| remaining.min(interval))
}
