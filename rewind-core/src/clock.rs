//! Wall-clock source in epoch milliseconds

use std::fmt;
use std::sync::Arc;

/// Epoch milliseconds
pub type Timestamp = i64;

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> Timestamp;
}

/// Clock anchored to the wall clock at construction and advanced by the
/// tokio monotonic clock, so paused test runtimes control it.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_ms: Timestamp,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor to the current wall-clock time
    pub fn new() -> Self {
        Self::anchored_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor to a fixed epoch time
    pub fn anchored_at(anchor_ms: Timestamp) -> Self {
        Self {
            anchor_ms,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> Timestamp {
        self.anchor_ms + self.anchor.elapsed().as_millis() as Timestamp
    }
}

/// Shared default clock
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_paused_tokio_time() {
        let clock = TokioClock::anchored_at(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(clock.now_ms(), 1_002_500);
    }
}
