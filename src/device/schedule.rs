//! Due-time bookkeeping for periodic work
//!
//! Timers never sleep. Callers pass `now` on every tick and the timer answers
//! whether its period has elapsed since the last time it fired.

use std::time::{Duration, Instant};

/// Fixed-period timer, due immediately until it first fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTimer {
    period: Duration,
    last_fired: Option<Instant>,
}

impl IntervalTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fired: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        }
    }

    /// Record that the timer fired at `now`; the next period starts here
    pub fn mark(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    /// Fire if due, returning whether it did
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }

    /// Time left until due, zero if already due
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_fired {
            None => Duration::ZERO,
            Some(last) => (last + self.period).saturating_duration_since(now),
        }
    }
}
