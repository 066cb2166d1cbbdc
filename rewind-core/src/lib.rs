//! # Rewind - session replay capture and flush pipeline
//!
//! Rewind turns a stream of recorder events and user signals into ordered,
//! self-describing replay segments:
//! - Session lifecycle with idle and max-life expiry, sampling and persistence
//! - Event buffering with stale-event rejection and optional zlib compression
//! - Debounced, single-flight flushing with a maximum wait
//! - Segment delivery with compounding retry backoff
//! - Buffered ("only send when an error happens") and continuous recording
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rewind_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let clock = default_clock();
//!     let recorder = Arc::new(ManualRecorder::new(clock.clone()));
//!     let (transport, mut envelopes) = ChannelTransport::new();
//!
//!     let engine = ReplayEngine::builder(RewindConfig::load()?)
//!         .clock(clock)
//!         .recorder(recorder)
//!         .transport(Arc::new(transport))
//!         .build()?;
//!
//!     engine.start()?;
//!     engine.flush().await;
//!
//!     if let Some(envelope) = envelopes.recv().await {
//!         println!("segment {}", envelope.event.segment_id);
//!     }
//!     engine.stop(true).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Session store**: loads, renews and persists the replay session
//! - **Event buffer**: accumulates one segment's events
//! - **Flush scheduler**: debounce plus single-flight lock around flushes
//! - **Retrying sender**: wraps segments in envelopes and retries failures
//! - **Replay engine**: wires the above to a recorder and signal hooks

pub mod buffer;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod hooks;
pub mod recorder;
pub mod scheduler;
pub mod sender;
pub mod session;
pub mod throttle;
pub mod timer;
pub mod transport;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every send failure message; errors carrying it never trigger a
/// buffered replay to be sent
pub const UNABLE_TO_SEND_REPLAY: &str = "Unable to send Replay";

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{
        AddOutcome, ArrayEventBuffer, BufferFactory, CompressedEventBuffer, EventBuffer,
        RecordingData, RejectReason, create_event_buffer,
    };
    pub use crate::clock::{Clock, Timestamp, TokioClock, default_clock};
    pub use crate::config::{
        BufferConfig, ConfigBuilder, FlushConfig, MIN_REPLAY_DURATION_LIMIT, MutationConfig,
        RetryConfig, RewindConfig, SampleRates, SessionConfig, ThrottleConfig,
    };
    pub use crate::context::{EventContext, PopEventContext};
    pub use crate::engine::{
        ErrorReporter, RecordingMode, ReplayEngine, ReplayEngineBuilder, SessionCheck, SpanSource,
    };
    pub use crate::envelope::{ReplayEnvelope, ReplayEvent, ReplaySegment, SdkInfo};
    pub use crate::error::{Result, RewindError};
    pub use crate::event::{
        Breadcrumb, CapturedEvent, CapturedEventKind, EventType, PerformanceSpan, RecordingEvent,
    };
    pub use crate::hooks::{
        HookHandle, HookRegistry, KeyPress, LoggingHook, Signal, SignalHook, SignalKind,
        VisibilityState,
    };
    pub use crate::recorder::{ManualRecorder, Recorder, RecorderOptions, RecordingEmitter};
    pub use crate::scheduler::{FlushGate, FlushRunner, FlushScheduler};
    pub use crate::sender::{RetryState, RetryingSender};
    pub use crate::session::{
        FileStorage, FixedSampler, LoadedSession, MemoryStorage, RandomSampler, SampleDecision,
        Session, SessionSampler, SessionStorage, SessionStore,
    };
    pub use crate::throttle::{EventThrottle, ThrottleDecision};
    pub use crate::timer::DelayedTask;
    pub use crate::transport::{
        ChannelTransport, FileTransport, Transport, TransportError, TransportResponse,
    };
}
