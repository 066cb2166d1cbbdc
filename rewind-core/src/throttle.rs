//! Rate limit for synthetic breadcrumb and span events

use std::collections::VecDeque;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::config::ThrottleConfig;
use crate::session::duration_ms;

/// Outcome of [`EventThrottle::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Within budget
    Allow,
    /// First event over budget in this burst; callers record a marker
    Throttled,
    /// Further events over budget
    Skipped,
}

/// Sliding-window counter
#[derive(Debug)]
pub struct EventThrottle {
    max_events: usize,
    window_ms: i64,
    hits: VecDeque<Timestamp>,
    throttled: bool,
}

impl EventThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self::with_limits(config.max_events, config.window)
    }

    pub fn with_limits(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window_ms: duration_ms(window),
            hits: VecDeque::new(),
            throttled: false,
        }
    }

    /// Count an event at `now`
    pub fn check(&mut self, now: Timestamp) -> ThrottleDecision {
        while self
            .hits
            .front()
            .is_some_and(|hit| now - *hit >= self.window_ms)
        {
            self.hits.pop_front();
        }

        if self.hits.len() < self.max_events {
            self.hits.push_back(now);
            self.throttled = false;
            return ThrottleDecision::Allow;
        }

        if self.throttled {
            ThrottleDecision::Skipped
        } else {
            self.throttled = true;
            ThrottleDecision::Throttled
        }
    }

    pub fn reset(&mut self) {
        self.hits.clear();
        self.throttled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttles_once_per_burst_and_recovers() {
        let mut throttle = EventThrottle::with_limits(3, Duration::from_secs(5));

        for _ in 0..3 {
            assert_eq!(throttle.check(1_000), ThrottleDecision::Allow);
        }
        assert_eq!(throttle.check(1_100), ThrottleDecision::Throttled);
        assert_eq!(throttle.check(1_200), ThrottleDecision::Skipped);

        assert_eq!(throttle.check(6_000), ThrottleDecision::Allow);
    }
}
