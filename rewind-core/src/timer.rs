//! Cancellable delayed tasks
//!
//! Both the retry loop and the flush debounce wait on a [`DelayedTask`]
//! instead of sleeping directly, so pending waits can be inspected and
//! cancelled from outside the waiting future.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RewindError};

/// A deadline that can be awaited or cancelled
#[derive(Debug, Clone)]
pub struct DelayedTask {
    deadline: Instant,
    token: CancellationToken,
}

impl DelayedTask {
    /// Fire `delay` from now
    pub fn new(delay: Duration) -> Self {
        Self::until(Instant::now() + delay)
    }

    /// Fire at `deadline`
    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            token: CancellationToken::new(),
        }
    }

    /// Time left before the task fires
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancel the wait; pending and future `wait` calls return `Cancelled`
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the deadline
    pub async fn wait(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RewindError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_at_deadline() {
        let start = Instant::now();
        let task = DelayedTask::new(Duration::from_millis(5000));
        task.wait().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_pending_wait() {
        let task = DelayedTask::new(Duration::from_secs(60));
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.wait().await })
        };

        tokio::time::advance(Duration::from_secs(1)).await;
        task.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(RewindError::Cancelled)));
        assert_eq!(task.remaining(), Duration::from_secs(59));
    }
}
