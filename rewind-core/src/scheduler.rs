//! Flush request shaping: debounce with max wait, plus a single-flight lock
//!
//! [`FlushScheduler::schedule`] arms a timer that fires after `min_delay` of
//! quiet, but never later than `max_delay` after the first unflushed trigger.
//! [`FlushScheduler::flush`] runs the flush itself once the runner's gate
//! allows it; a deferred flush goes back on the timer. While one flush is in
//! flight, further callers wait for it and then schedule exactly one
//! follow-up, so updates made during the flight are not lost and not
//! multiplied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::FlushConfig;
use crate::error::{Result, RewindError};
use crate::timer::DelayedTask;

/// Verdict of [`FlushRunner::check_flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushGate {
    Proceed,
    /// Drop this request
    Skip,
    /// Not ready yet; try again after another debounce period
    Defer,
}

/// The unit of work driven by the scheduler
#[async_trait]
pub trait FlushRunner: Send + Sync + 'static {
    /// Gate checked before every flush
    fn check_flush(&self, force: bool) -> FlushGate;

    /// Perform one flush
    async fn run_flush(&self) -> Result<()>;

    /// Receives errors returned by `run_flush`
    fn handle_flush_error(&self, error: &RewindError);
}

type SharedFlush = Shared<BoxFuture<'static, std::result::Result<(), Arc<RewindError>>>>;

#[derive(Default)]
struct Debounce {
    timer: Option<DelayedTask>,
    first_trigger: Option<Instant>,
    generation: u64,
}

struct SchedulerState {
    config: FlushConfig,
    debounce: Mutex<Debounce>,
    in_flight: Mutex<Option<SharedFlush>>,
    runs: AtomicU64,
}

/// Debounced, single-flight flush driver
pub struct FlushScheduler<R: FlushRunner> {
    state: Arc<SchedulerState>,
    runner: Weak<R>,
}

impl<R: FlushRunner> Clone for FlushScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            runner: self.runner.clone(),
        }
    }
}

enum Role {
    Leader(SharedFlush),
    Follower(SharedFlush),
}

impl<R: FlushRunner> FlushScheduler<R> {
    /// Create a scheduler driving `runner`
    pub fn new(config: FlushConfig, runner: Weak<R>) -> Self {
        Self {
            state: Arc::new(SchedulerState {
                config,
                debounce: Mutex::new(Debounce::default()),
                in_flight: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
            runner,
        }
    }

    /// Request a debounced flush
    pub fn schedule(&self) {
        let now = Instant::now();
        let (task, generation) = {
            let mut debounce = self.state.debounce.lock();
            let first = *debounce.first_trigger.get_or_insert(now);
            let deadline = (now + self.state.config.min_delay).min(first + self.state.config.max_delay);

            if let Some(previous) = debounce.timer.take() {
                previous.cancel();
            }
            debounce.generation += 1;
            let task = DelayedTask::until(deadline);
            debounce.timer = Some(task.clone());
            (task, debounce.generation)
        };

        let this = self.clone();
        tokio::spawn(async move {
            if task.wait().await.is_err() {
                return;
            }
            {
                let mut debounce = this.state.debounce.lock();
                if debounce.generation != generation {
                    return;
                }
                debounce.timer = None;
                debounce.first_trigger = None;
            }
            this.flush(false).await;
        });
    }

    /// Drop any pending debounced flush
    pub fn cancel(&self) {
        let mut debounce = self.state.debounce.lock();
        if let Some(timer) = debounce.timer.take() {
            timer.cancel();
        }
        debounce.first_trigger = None;
        debounce.generation += 1;
    }

    /// Cancel the pending timer and flush right away
    pub async fn flush_now(&self) {
        self.cancel();
        self.flush(false).await;
    }

    /// Run a flush under the single-flight lock
    pub async fn flush(&self, force: bool) {
        let Some(runner) = self.runner.upgrade() else {
            return;
        };
        match runner.check_flush(force) {
            FlushGate::Proceed => {}
            FlushGate::Skip => return,
            FlushGate::Defer => {
                self.schedule();
                return;
            }
        }

        // A flush is about to happen; queued ones are redundant
        self.cancel();

        let role = {
            let mut slot = self.state.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => Role::Follower(existing.clone()),
                None => {
                    let state = self.state.clone();
                    let flight = {
                        let runner = runner.clone();
                        async move {
                            let result = runner.run_flush().await.map_err(Arc::new);
                            *state.in_flight.lock() = None;
                            result
                        }
                        .boxed()
                        .shared()
                    };
                    *slot = Some(flight.clone());
                    self.state.runs.fetch_add(1, Ordering::SeqCst);
                    // Driven by its own task so the lock is released even if
                    // every waiter is dropped
                    tokio::spawn(flight.clone());
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Leader(flight) => {
                if let Err(e) = flight.await {
                    runner.handle_flush_error(&e);
                }
            }
            Role::Follower(flight) => {
                if let Err(e) = flight.await {
                    tracing::debug!(error = %e, "In-flight flush failed while waiting on it");
                }
                self.schedule();
            }
        }
    }

    /// Whether a flush is currently running
    pub fn is_in_flight(&self) -> bool {
        self.state.in_flight.lock().is_some()
    }

    /// Whether a debounced flush is pending
    pub fn is_scheduled(&self) -> bool {
        self.state.debounce.lock().timer.is_some()
    }

    /// Flushes started so far
    pub fn flushes_started(&self) -> u64 {
        self.state.runs.load(Ordering::SeqCst)
    }
}
