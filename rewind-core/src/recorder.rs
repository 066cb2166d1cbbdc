//! Recorder seam
//!
//! The DOM recorder itself lives outside this crate. The engine starts it
//! with a [`RecordingEmitter`] and receives every event through it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::event::RecordingEvent;

/// Options passed to [`Recorder::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecorderOptions {
    /// Force a full snapshot this often; set while buffering
    pub checkout_every: Option<Duration>,
}

/// Callback handed to the recorder for one recording run.
///
/// The first event of each run is treated as a checkout whatever the
/// recorder says.
#[derive(Clone)]
pub struct RecordingEmitter {
    sink: Arc<dyn Fn(RecordingEvent, bool) + Send + Sync>,
    on_mutation: Option<Arc<dyn Fn(usize) -> bool + Send + Sync>>,
    had_first_event: Arc<AtomicBool>,
}

impl RecordingEmitter {
    pub fn new(sink: impl Fn(RecordingEvent, bool) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
            on_mutation: None,
            had_first_event: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Consult `handler` before processing each mutation batch
    pub fn with_mutation_handler(
        mut self,
        handler: impl Fn(usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_mutation = Some(Arc::new(handler));
        self
    }

    /// Report a batch of `count` DOM mutations. Returns false when the
    /// recorder must drop the batch.
    pub fn mutations(&self, count: usize) -> bool {
        self.on_mutation.as_ref().is_none_or(|handler| handler(count))
    }

    /// Forward an event
    pub fn emit(&self, event: RecordingEvent, is_checkout: bool) {
        let first = !self.had_first_event.swap(true, Ordering::SeqCst);
        (self.sink)(event, is_checkout || first);
    }
}

impl fmt::Debug for RecordingEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingEmitter")
            .field("had_first_event", &self.had_first_event.load(Ordering::SeqCst))
            .finish()
    }
}

/// Produces recording events
pub trait Recorder: Send + Sync {
    /// Begin a recording run
    fn start(&self, options: RecorderOptions, emitter: RecordingEmitter) -> Result<()>;

    /// End the current run
    fn stop(&self);

    /// Emit a full snapshot through the current run's emitter
    fn take_full_snapshot(&self);
}

/// Recorder driven by hand, for scripted sessions and tests.
///
/// Starting a run or taking a snapshot emits a full snapshot stamped with
/// the clock's current time.
pub struct ManualRecorder {
    clock: Arc<dyn Clock>,
    emitter: Mutex<Option<RecordingEmitter>>,
    options: Mutex<Option<RecorderOptions>>,
    starts: AtomicUsize,
    snapshots: AtomicUsize,
}

impl ManualRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            emitter: Mutex::new(None),
            options: Mutex::new(None),
            starts: AtomicUsize::new(0),
            snapshots: AtomicUsize::new(0),
        }
    }

    /// Emit an event into the current run; ignored when stopped
    pub fn emit(&self, event: RecordingEvent, is_checkout: bool) -> bool {
        let emitter = self.emitter.lock().clone();
        match emitter {
            Some(emitter) => {
                emitter.emit(event, is_checkout);
                true
            }
            None => false,
        }
    }

    /// Record a mutation batch of `count` nodes; returns whether it was kept
    pub fn mutate(&self, count: usize) -> bool {
        let Some(emitter) = self.emitter.lock().clone() else {
            return false;
        };
        if !emitter.mutations(count) {
            return false;
        }
        let event = RecordingEvent::incremental(
            self.clock.now_ms(),
            serde_json::json!({ "source": 0, "mutations": count }),
        );
        emitter.emit(event, false);
        true
    }

    pub fn is_running(&self) -> bool {
        self.emitter.lock().is_some()
    }

    /// Options of the current or last run
    pub fn options(&self) -> Option<RecorderOptions> {
        *self.options.lock()
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    fn emit_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let snapshot = RecordingEvent::full_snapshot(
            self.clock.now_ms(),
            serde_json::json!({ "node": { "type": 0, "childNodes": [] } }),
        );
        self.emit(snapshot, true);
    }
}

impl Recorder for ManualRecorder {
    fn start(&self, options: RecorderOptions, emitter: RecordingEmitter) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.options.lock() = Some(options);
        *self.emitter.lock() = Some(emitter);
        self.emit_snapshot();
        Ok(())
    }

    fn stop(&self) {
        self.emitter.lock().take();
    }

    fn take_full_snapshot(&self) {
        if self.is_running() {
            self.emit_snapshot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;

    #[test]
    fn first_emit_is_a_checkout() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let emitter = {
            let seen = seen.clone();
            RecordingEmitter::new(move |_event, is_checkout| seen.lock().push(is_checkout))
        };

        emitter.emit(RecordingEvent::incremental(1, serde_json::Value::Null), false);
        emitter.emit(RecordingEvent::incremental(2, serde_json::Value::Null), false);
        emitter.emit(RecordingEvent::full_snapshot(3, serde_json::Value::Null), true);

        assert_eq!(*seen.lock(), vec![true, false, true]);
    }

    #[test]
    fn mutation_handler_can_veto_a_batch() {
        let recorder = ManualRecorder::new(Arc::new(TokioClock::anchored_at(1_000_000_000_000)));
        let events = Arc::new(AtomicUsize::new(0));
        let emitter = {
            let events = events.clone();
            RecordingEmitter::new(move |_e, _c| {
                events.fetch_add(1, Ordering::SeqCst);
            })
            .with_mutation_handler(|count| count <= 100)
        };

        assert!(!recorder.mutate(10));
        recorder.start(RecorderOptions::default(), emitter).unwrap();
        assert!(recorder.mutate(100));
        assert!(!recorder.mutate(101));

        // Start snapshot plus the accepted batch
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn manual_recorder_snapshots_on_start() {
        let recorder = ManualRecorder::new(Arc::new(TokioClock::anchored_at(1_000_000_000_000)));
        let count = Arc::new(AtomicUsize::new(0));
        let emitter = {
            let count = count.clone();
            RecordingEmitter::new(move |_e, _c| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        recorder.start(RecorderOptions::default(), emitter).unwrap();
        recorder.take_full_snapshot();
        recorder.stop();
        recorder.take_full_snapshot();
        assert!(!recorder.emit(RecordingEvent::incremental(1, serde_json::Value::Null), false));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.snapshot_count(), 2);
        assert_eq!(recorder.start_count(), 1);
    }
}
