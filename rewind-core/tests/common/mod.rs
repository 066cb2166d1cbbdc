//! Shared harness for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rewind_core::prelude::*;
use tokio::time::Instant;

pub const NOW: Timestamp = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Transport recording every attempt, optionally slow or failing
pub struct MockTransport {
    attempts: Mutex<Vec<(Instant, ReplayEnvelope)>>,
    failing: AtomicBool,
    delay: Duration,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn envelopes(&self) -> Vec<ReplayEnvelope> {
        self.attempts.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn segment_ids(&self) -> Vec<u64> {
        self.attempts
            .lock()
            .iter()
            .map(|(_, e)| e.event.segment_id)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        envelope: ReplayEnvelope,
    ) -> std::result::Result<Option<TransportResponse>, TransportError> {
        self.attempts.lock().push((Instant::now(), envelope));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Other(anyhow::anyhow!("collector offline")));
        }
        Ok(Some(TransportResponse::ok()))
    }
}

/// Error reporter collecting messages
#[derive(Default)]
pub struct CollectingReporter {
    pub errors: Mutex<Vec<String>>,
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &RewindError) {
        self.errors.lock().push(error.to_string());
    }
}

pub struct Harness {
    pub engine: ReplayEngine,
    pub recorder: Arc<ManualRecorder>,
    pub transport: Arc<MockTransport>,
    pub clock: Arc<dyn Clock>,
    pub storage: Arc<MemoryStorage>,
}

impl Harness {
    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Emit an incremental event stamped now
    pub fn emit(&self) -> bool {
        self.recorder.emit(
            RecordingEvent::incremental(self.now(), serde_json::json!({ "source": 2 })),
            false,
        )
    }

    pub fn click(&self) {
        let crumb = Breadcrumb::new("ui.click", self.now()).with_message("button#submit");
        self.engine.hooks().dispatch(&Signal::Breadcrumb(crumb));
    }
}

/// Uncompressed config so recordings can be inspected; flushes are not held
/// back by the minimum replay duration
pub fn test_config() -> RewindConfig {
    let mut config = RewindConfig::default();
    config.buffer.use_compression = false;
    config.flush.min_replay_duration = Duration::ZERO;
    config
}

pub fn harness(sampler: FixedSampler) -> Harness {
    harness_with(test_config(), sampler, MockTransport::new(), None)
}

pub fn harness_with(
    config: RewindConfig,
    sampler: FixedSampler,
    transport: Arc<MockTransport>,
    reporter: Option<Arc<CollectingReporter>>,
) -> Harness {
    init_tracing();
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::anchored_at(NOW));
    let recorder = Arc::new(ManualRecorder::new(clock.clone()));
    let storage = Arc::new(MemoryStorage::new());

    let mut builder = ReplayEngine::builder(config)
        .clock(clock.clone())
        .recorder(recorder.clone())
        .transport(transport.clone())
        .storage(storage.clone())
        .sampler(Arc::new(sampler))
        .initial_url("https://app.example.com/");
    if let Some(reporter) = reporter {
        builder = builder.error_reporter(reporter);
    }

    Harness {
        engine: builder.build().expect("engine builds"),
        recorder,
        transport,
        clock,
        storage,
    }
}

/// Events of an uncompressed envelope
pub fn recorded_events(envelope: &ReplayEnvelope) -> Vec<RecordingEvent> {
    serde_json::from_slice(envelope.recording_body()).expect("recording is a JSON array")
}
