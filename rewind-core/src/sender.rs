//! Segment delivery with compounding retry backoff
//!
//! Each failed attempt multiplies the *current* interval by the new retry
//! count, so with a 5s base the waits are 5s, 10s, then 30s. After
//! `max_retries` retries the segment is dropped with
//! [`RewindError::MaxRetriesExceeded`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RetryConfig;
use crate::envelope::{ReplayEnvelope, ReplaySegment, SdkInfo};
use crate::error::{Result, RewindError};
use crate::timer::DelayedTask;
use crate::transport::Transport;

/// Inspectable retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed for the segment in flight
    pub count: u32,
    /// Wait applied before the latest retry
    pub interval: Duration,
}

impl RetryState {
    fn new(config: &RetryConfig) -> Self {
        Self {
            count: 0,
            interval: config.base_interval,
        }
    }

    /// Advance after a failure; `None` once retries are exhausted
    pub fn next_wait(&mut self, config: &RetryConfig) -> Option<Duration> {
        if self.count >= config.max_retries {
            return None;
        }
        self.count += 1;
        self.interval *= self.count;
        Some(self.interval)
    }

    fn reset(&mut self, config: &RetryConfig) {
        *self = Self::new(config);
    }
}

/// Sends segments through a [`Transport`], retrying failures
pub struct RetryingSender {
    transport: Arc<dyn Transport>,
    config: RetryConfig,
    sdk: SdkInfo,
    state: Mutex<RetryState>,
    pending: Mutex<Option<DelayedTask>>,
}

impl RetryingSender {
    /// Create a sender
    pub fn new(transport: Arc<dyn Transport>, config: RetryConfig) -> Self {
        let state = RetryState::new(&config);
        Self {
            transport,
            config,
            sdk: SdkInfo::default(),
            state: Mutex::new(state),
            pending: Mutex::new(None),
        }
    }

    /// Override the SDK info reported in envelope headers
    pub fn with_sdk(mut self, sdk: SdkInfo) -> Self {
        self.sdk = sdk;
        self
    }

    /// Current retry bookkeeping
    pub fn retry_state(&self) -> RetryState {
        *self.state.lock()
    }

    /// The wait currently pending between attempts, if any
    pub fn pending_retry(&self) -> Option<DelayedTask> {
        self.pending.lock().clone()
    }

    /// Abort a pending retry wait; the in-flight `send` returns `Cancelled`
    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.cancel();
        }
    }

    /// Send one segment, retrying until success or exhaustion
    pub async fn send(&self, segment: &ReplaySegment) -> Result<()> {
        let envelope = ReplayEnvelope::from_segment(segment, &self.sdk)?;

        loop {
            let error = match self.transport.send(envelope.clone()).await {
                Ok(Some(response)) if response.is_success() => {
                    self.state.lock().reset(&self.config);
                    tracing::debug!(
                        replay_id = %segment.replay_id,
                        segment_id = segment.segment_id,
                        "Replay segment sent"
                    );
                    return Ok(());
                }
                Ok(Some(response)) => RewindError::SendFailure(format!(
                    "transport responded with status {}",
                    response.status_code
                )),
                Ok(None) => RewindError::SendFailure("transport returned no response".to_string()),
                Err(e) => RewindError::SendFailure(e.to_string()),
            };

            let wait = {
                let mut state = self.state.lock();
                match state.next_wait(&self.config) {
                    Some(wait) => wait,
                    None => {
                        let attempts = state.count + 1;
                        state.reset(&self.config);
                        tracing::error!(
                            replay_id = %segment.replay_id,
                            segment_id = segment.segment_id,
                            attempts,
                            error = %error,
                            "Giving up on replay segment"
                        );
                        return Err(RewindError::MaxRetriesExceeded { attempts });
                    }
                }
            };

            tracing::warn!(
                replay_id = %segment.replay_id,
                segment_id = segment.segment_id,
                retry_in_ms = wait.as_millis() as u64,
                error = %error,
                "Replay segment send failed, retrying"
            );

            let task = DelayedTask::new(wait);
            *self.pending.lock() = Some(task.clone());
            let waited = task.wait().await;
            self.pending.lock().take();

            if let Err(e) = waited {
                self.state.lock().reset(&self.config);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RecordingData;
    use crate::config::SampleRates;
    use crate::context::PopEventContext;
    use crate::session::SampleDecision;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` attempts and records attempt times
    struct FlakyTransport {
        failures: usize,
        attempts: AtomicUsize,
        times: Mutex<Vec<Instant>>,
    }

    impl FlakyTransport {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicUsize::new(0),
                times: Mutex::new(Vec::new()),
            })
        }

        fn gaps_ms(&self) -> Vec<u128> {
            let times = self.times.lock();
            times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(
            &self,
            _envelope: ReplayEnvelope,
        ) -> std::result::Result<Option<TransportResponse>, TransportError> {
            self.times.lock().push(Instant::now());
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                if attempt % 2 == 0 {
                    Err(TransportError::Other(anyhow::anyhow!("connection reset")))
                } else {
                    Ok(None)
                }
            } else {
                Ok(Some(TransportResponse::ok()))
            }
        }
    }

    fn segment() -> ReplaySegment {
        ReplaySegment {
            replay_id: "replay".into(),
            segment_id: 0,
            recording: RecordingData::Text("[]".into()),
            context: PopEventContext {
                initial_timestamp: 1_700_000_000_000,
                initial_url: String::new(),
                error_ids: vec![],
                trace_ids: vec![],
                urls: vec![],
            },
            timestamp: 1_700_000_000_000,
            include_start_timestamp: true,
            replay_type: SampleDecision::Continuous,
            rates: SampleRates::default(),
        }
    }

    #[test]
    fn test_compounding_interval() {
        let config = RetryConfig::default();
        let mut state = RetryState::new(&config);

        assert_eq!(state.next_wait(&config), Some(Duration::from_millis(5000)));
        assert_eq!(state.next_wait(&config), Some(Duration::from_millis(10000)));
        assert_eq!(state.next_wait(&config), Some(Duration::from_millis(30000)));
        assert_eq!(state.next_wait(&config), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_exhaustion() {
        let transport = FlakyTransport::new(usize::MAX);
        let sender = RetryingSender::new(transport.clone(), RetryConfig::default());

        let result = sender.send(&segment()).await;

        assert!(matches!(
            result,
            Err(RewindError::MaxRetriesExceeded { attempts: 4 })
        ));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(transport.gaps_ms(), vec![5000, 10000, 30000]);
        assert_eq!(sender.retry_state().count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retries_resets_state() {
        let transport = FlakyTransport::new(2);
        let sender = RetryingSender::new(transport.clone(), RetryConfig::default());

        sender.send(&segment()).await.unwrap();

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transport.gaps_ms(), vec![5000, 10000]);
        assert_eq!(
            sender.retry_state(),
            RetryState {
                count: 0,
                interval: Duration::from_millis(5000)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_retry() {
        let transport = FlakyTransport::new(usize::MAX);
        let sender = Arc::new(RetryingSender::new(transport.clone(), RetryConfig::default()));

        let handle = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.send(&segment()).await })
        };

        tokio::time::advance(Duration::from_millis(1000)).await;
        while sender.pending_retry().is_none() {
            tokio::task::yield_now().await;
        }
        assert_eq!(sender.retry_state().count, 1);

        sender.cancel();
        assert!(matches!(handle.await.unwrap(), Err(RewindError::Cancelled)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_is_a_failure() {
        struct Rejecting;

        #[async_trait]
        impl Transport for Rejecting {
            async fn send(
                &self,
                _envelope: ReplayEnvelope,
            ) -> std::result::Result<Option<TransportResponse>, TransportError> {
                Ok(Some(TransportResponse { status_code: 500 }))
            }
        }

        let sender = RetryingSender::new(
            Arc::new(Rejecting),
            RetryConfig::default().with_max_retries(1),
        );
        assert!(matches!(
            sender.send(&segment()).await,
            Err(RewindError::MaxRetriesExceeded { attempts: 2 })
        ));
    }
}
