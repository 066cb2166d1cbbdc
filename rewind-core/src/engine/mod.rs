//! Replay engine
//!
//! [`ReplayEngine`] wires the session store, event buffer, flush scheduler
//! and retrying sender together. It receives recorder events and signals,
//! decides when segments are flushed, and manages the buffered to
//! continuous transition plus idle and visibility driven session expiry.
//!
//! All mutable state lives behind one mutex that is never held across an
//! `.await` nor while calling into the recorder, transport or hooks; the
//! recorder may emit synchronously from `start` or `take_full_snapshot`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rewind_core::prelude::*;
//!
//! let (transport, mut envelopes) = ChannelTransport::new();
//! let engine = ReplayEngine::builder(RewindConfig::default())
//!     .recorder(recorder)
//!     .transport(Arc::new(transport))
//!     .build()?;
//!
//! engine.initialize_sampling();
//! engine.hooks().dispatch(&Signal::Breadcrumb(Breadcrumb::new("ui.click", now)));
//! ```

mod flush;
mod handlers;
mod lifecycle;

use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::{BufferFactory, EventBuffer, create_event_buffer};
use crate::clock::{Clock, Timestamp, default_clock};
use crate::config::{BufferConfig, RewindConfig};
use crate::context::{EventContext, PopEventContext};
use crate::envelope::SdkInfo;
use crate::error::{Result, RewindError};
use crate::event::{CapturedEvent, PerformanceSpan, RecordingEvent};
use crate::hooks::{HookHandle, HookRegistry};
use crate::recorder::Recorder;
use crate::scheduler::FlushScheduler;
use crate::sender::{RetryState, RetryingSender};
use crate::session::{
    MemoryStorage, RandomSampler, Session, SessionSampler, SessionStorage, SessionStore,
};
use crate::throttle::EventThrottle;
use crate::transport::Transport;

/// Recording mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Trailing window kept in memory until an error occurs
    Buffered,
    /// Segments flushed throughout the session
    Continuous,
}

/// Outcome of a session validity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// Current session is still valid
    Active,
    /// Session expired and was replaced
    Refreshed,
    /// User inactive for too long; recording paused
    Paused,
    /// No session
    Missing,
}

/// Receives pipeline errors when exception capture is enabled
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &RewindError);
}

/// Supplies performance spans collected outside the signal hooks
pub trait SpanSource: Send + Sync {
    /// Take the spans gathered since the last call
    fn take_spans(&self) -> Vec<PerformanceSpan>;
}

pub(crate) struct EngineState {
    pub(crate) session: Option<Session>,
    pub(crate) buffer: Option<Box<dyn EventBuffer>>,
    pub(crate) context: EventContext,
    pub(crate) mode: RecordingMode,
    pub(crate) last_user_activity: Timestamp,
    pub(crate) enabled: bool,
    pub(crate) paused: bool,
    pub(crate) recording: bool,
    pub(crate) converting: bool,
    /// Latest error-triggered conversion, awaited by `stop`
    pub(crate) conversion: Option<Shared<BoxFuture<'static, ()>>>,
    pub(crate) pending_spans: Vec<PerformanceSpan>,
    pub(crate) throttle: EventThrottle,
    pub(crate) hook_handle: Option<HookHandle>,
}

pub(crate) struct EngineInner {
    pub(crate) config: RewindConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) store: SessionStore,
    pub(crate) sender: RetryingSender,
    pub(crate) recorder: Arc<dyn Recorder>,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) span_sources: Vec<Arc<dyn SpanSource>>,
    pub(crate) buffer_factory: BufferFactory,
    pub(crate) reporter: Option<Arc<dyn ErrorReporter>>,
    pub(crate) scheduler: FlushScheduler<EngineInner>,
    pub(crate) initial_url: Option<String>,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) me: Weak<EngineInner>,
}

/// Cheap-to-clone handle to a replay engine
#[derive(Clone)]
pub struct ReplayEngine {
    inner: Arc<EngineInner>,
}

impl ReplayEngine {
    /// Start building an engine
    pub fn builder(config: RewindConfig) -> ReplayEngineBuilder {
        ReplayEngineBuilder::new(config)
    }

    /// Load or create a session and start recording if it is sampled
    pub fn initialize_sampling(&self) {
        self.inner.initialize_sampling();
    }

    /// Start a continuous recording regardless of sampling
    pub fn start(&self) -> Result<()> {
        self.inner.start_with_mode(RecordingMode::Continuous)
    }

    /// Start a buffered recording regardless of sampling
    pub fn start_buffering(&self) -> Result<()> {
        self.inner.start_with_mode(RecordingMode::Buffered)
    }

    /// Stop recording and clear the session, optionally flushing first
    pub async fn stop(&self, force_flush: bool) {
        self.inner.stop(force_flush).await;
    }

    /// Stop the recorder without flushing
    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Restart the recorder after a pause
    pub fn resume(&self) {
        self.inner.resume();
    }

    /// Flush now under the single-flight lock
    pub async fn flush(&self) {
        self.inner.scheduler.flush(false).await;
    }

    /// Cancel any debounced flush and flush now
    pub async fn flush_immediate(&self) {
        self.inner.scheduler.flush_now().await;
    }

    /// Request a debounced flush
    pub fn schedule_flush(&self) {
        self.inner.scheduler.schedule();
    }

    /// Flush now unless buffering
    pub async fn conditional_flush(&self) {
        self.inner.conditional_flush().await;
    }

    /// Drop a pending debounced flush
    pub fn cancel_flush(&self) {
        self.inner.scheduler.cancel();
    }

    /// Send the buffered replay and switch to continuous recording
    pub async fn send_buffered_replay_or_flush(&self, continue_recording: bool) {
        self.inner.send_buffered_replay_or_flush(continue_recording).await;
    }

    /// Wait for a buffered replay conversion started by an error event
    pub async fn wait_for_conversion(&self) {
        self.inner.wait_for_conversion().await;
    }

    /// Forward a recorder event
    pub fn handle_recording_emit(&self, event: RecordingEvent, is_checkout: bool) {
        self.inner.handle_recording_emit(event, is_checkout);
    }

    /// Run an update and schedule a flush unless it returns true or the engine is buffering
    pub fn add_update(&self, update: impl FnOnce() -> bool) {
        self.inner.add_update(|_| update());
    }

    /// Tag application events with the replay and react to errors
    pub fn process_event(&self, event: CapturedEvent) -> CapturedEvent {
        self.inner.process_event(event)
    }

    /// Re-validate the session, replacing or pausing it when needed
    pub fn check_and_handle_expired_session(&self) -> SessionCheck {
        self.inner.check_and_handle_expired_session(None)
    }

    /// Register genuine user activity, resuming a paused recording
    pub fn trigger_user_activity(&self) {
        self.inner.trigger_user_activity();
    }

    /// Register user activity without resuming
    pub fn update_user_activity(&self) {
        self.inner.update_user_activity();
    }

    /// Registry signal sources publish into
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.inner.hooks
    }

    /// Current session
    pub fn session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    /// Current session id
    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session.as_ref().map(|s| s.id.clone())
    }

    /// Current recording mode
    pub fn recording_mode(&self) -> RecordingMode {
        self.inner.state.lock().mode
    }

    /// Whether a replay is active, paused or not
    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Whether recording is paused after inactivity or a manual pause
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Whether the recorder is running
    pub fn is_recording(&self) -> bool {
        self.inner.state.lock().recording
    }

    /// Events currently buffered
    pub fn buffered_events(&self) -> usize {
        self.inner
            .state
            .lock()
            .buffer
            .as_ref()
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Snapshot of the current segment's context without clearing it
    pub fn context(&self) -> PopEventContext {
        let state = self.inner.state.lock();
        let mut copy = state.context.clone();
        copy.pop()
    }

    /// Retry bookkeeping of the sender
    pub fn retry_state(&self) -> RetryState {
        self.inner.sender.retry_state()
    }

    /// Whether a flush is running
    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.is_in_flight()
    }

    /// Whether a debounced flush is pending
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.is_scheduled()
    }
}

/// Builder for [`ReplayEngine`]
pub struct ReplayEngineBuilder {
    config: RewindConfig,
    recorder: Option<Arc<dyn Recorder>>,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn SessionStorage>>,
    sampler: Option<Arc<dyn SessionSampler>>,
    clock: Option<Arc<dyn Clock>>,
    hooks: Option<Arc<HookRegistry>>,
    span_sources: Vec<Arc<dyn SpanSource>>,
    buffer_factory: Option<BufferFactory>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    initial_url: Option<String>,
    sdk: Option<SdkInfo>,
}

impl ReplayEngineBuilder {
    pub fn new(config: RewindConfig) -> Self {
        Self {
            config,
            recorder: None,
            transport: None,
            storage: None,
            sampler: None,
            clock: None,
            hooks: None,
            span_sources: Vec::new(),
            buffer_factory: None,
            reporter: None,
            initial_url: None,
            sdk: None,
        }
    }

    /// Recorder producing events (required)
    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Transport delivering envelopes (required)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Session storage; defaults to in-memory
    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Session sampler; defaults to random draws
    pub fn sampler(mut self, sampler: Arc<dyn SessionSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Clock; defaults to wall time advanced by tokio
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing hook registry
    pub fn hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Add a performance span source drained on every flush
    pub fn span_source(mut self, source: Arc<dyn SpanSource>) -> Self {
        self.span_sources.push(source);
        self
    }

    /// Event buffer constructor; defaults to [`create_event_buffer`]
    pub fn event_buffer(
        mut self,
        factory: impl Fn(&BufferConfig) -> Box<dyn EventBuffer> + Send + Sync + 'static,
    ) -> Self {
        self.buffer_factory = Some(Arc::new(factory));
        self
    }

    /// Receive pipeline errors when `capture_exceptions` is set
    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// URL reported as the replay's starting page
    pub fn initial_url(mut self, url: impl Into<String>) -> Self {
        self.initial_url = Some(url.into());
        self
    }

    /// SDK info for envelope headers
    pub fn sdk(mut self, sdk: SdkInfo) -> Self {
        self.sdk = Some(sdk);
        self
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid or the
    /// recorder or transport is missing.
    pub fn build(self) -> Result<ReplayEngine> {
        self.config.validate()?;
        let recorder = self
            .recorder
            .ok_or_else(|| RewindError::Configuration("a recorder is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| RewindError::Configuration("a transport is required".to_string()))?;

        let clock = self.clock.unwrap_or_else(default_clock);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let sampler = self.sampler.unwrap_or_else(|| Arc::new(RandomSampler));
        let store = SessionStore::new(
            storage,
            sampler,
            clock.clone(),
            self.config.session.clone(),
            self.config.sampling,
        );

        let mut sender = RetryingSender::new(transport, self.config.retry.clone());
        if let Some(sdk) = self.sdk {
            sender = sender.with_sdk(sdk);
        }

        let now = clock.now_ms();
        let config = self.config;
        let inner = Arc::new_cyclic(|me: &Weak<EngineInner>| EngineInner {
            scheduler: FlushScheduler::new(config.flush.clone(), me.clone()),
            state: Mutex::new(EngineState {
                session: None,
                buffer: None,
                context: EventContext::new(now),
                mode: RecordingMode::Continuous,
                last_user_activity: now,
                enabled: false,
                paused: false,
                recording: false,
                converting: false,
                conversion: None,
                pending_spans: Vec::new(),
                throttle: EventThrottle::new(&config.throttle),
                hook_handle: None,
            }),
            config,
            clock,
            store,
            sender,
            recorder,
            hooks: self.hooks.unwrap_or_default(),
            span_sources: self.span_sources,
            buffer_factory: self
                .buffer_factory
                .unwrap_or_else(|| Arc::new(create_event_buffer) as BufferFactory),
            reporter: self.reporter,
            initial_url: self.initial_url,
            me: me.clone(),
        });

        Ok(ReplayEngine { inner })
    }
}
