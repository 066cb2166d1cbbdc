//! In-memory accumulation of recording events
//!
//! Two implementations share the same bookkeeping:
//!
//! - [`ArrayEventBuffer`] serializes to a JSON array on `finish`.
//! - [`CompressedEventBuffer`] additionally deflates the array on a blocking
//!   worker so large segments never stall the runtime.
//!
//! `finish` drains the buffer synchronously and returns a `'static` future for
//! the encoding step. Callers can therefore drain under a lock and await the
//! encoding after releasing it.

mod array;
mod compressed;

pub use array::ArrayEventBuffer;
pub use compressed::CompressedEventBuffer;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::clock::Timestamp;
use crate::config::BufferConfig;
use crate::error::{Result, RewindError};
use crate::event::RecordingEvent;
use crate::session::duration_ms;

/// Outcome of adding an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended to the buffer
    Added,
    /// Not buffered
    Rejected(RejectReason),
}

/// Why an event was not buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Older than the stale-event threshold
    Stale,
}

/// Encoded segment body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingData {
    /// JSON array of events
    Text(String),
    /// Zlib-deflated JSON array of events
    Compressed(Vec<u8>),
}

impl RecordingData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RecordingData::Text(text) => text.as_bytes(),
            RecordingData::Compressed(bytes) => bytes,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, RecordingData::Compressed(_))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffer of recording events for the current segment
pub trait EventBuffer: Send {
    /// Append an event. Stale events are rejected; a checkout marks where
    /// the latest full snapshot starts.
    fn add_event(
        &mut self,
        event: RecordingEvent,
        is_checkout: bool,
        now: Timestamp,
    ) -> Result<AddOutcome>;

    /// Whether any event is buffered
    fn has_events(&self) -> bool;

    /// Number of buffered events
    fn len(&self) -> usize;

    /// Whether a checkout is buffered
    fn has_checkout(&self) -> bool;

    /// Earliest buffered timestamp
    fn earliest_timestamp(&self) -> Option<Timestamp>;

    /// Drop buffered events, optionally keeping the last checkout and what follows it
    fn clear(&mut self, keep_last_checkout: bool);

    /// Drain the buffer and encode its contents.
    ///
    /// The buffer is empty once this returns, whatever the encoding outcome.
    fn finish(&mut self) -> BoxFuture<'static, Result<RecordingData>>;

    /// Release resources; later operations fail with `BufferDestroyed`
    fn destroy(&mut self);
}

/// Builds the buffer for each new recording
pub type BufferFactory = Arc<dyn Fn(&BufferConfig) -> Box<dyn EventBuffer> + Send + Sync>;

/// Build the buffer matching `config`
pub fn create_event_buffer(config: &BufferConfig) -> Box<dyn EventBuffer> {
    if config.use_compression {
        Box::new(CompressedEventBuffer::new(config.stale_event_threshold))
    } else {
        Box::new(ArrayEventBuffer::new(config.stale_event_threshold))
    }
}

/// Bookkeeping shared by both buffer implementations
#[derive(Debug)]
pub(crate) struct EventStore {
    events: Vec<RecordingEvent>,
    last_checkout: Option<usize>,
    stale_threshold_ms: i64,
    destroyed: bool,
}

impl EventStore {
    pub(crate) fn new(stale_threshold: Duration) -> Self {
        Self {
            events: Vec::new(),
            last_checkout: None,
            stale_threshold_ms: duration_ms(stale_threshold),
            destroyed: false,
        }
    }

    pub(crate) fn add(
        &mut self,
        mut event: RecordingEvent,
        is_checkout: bool,
        now: Timestamp,
    ) -> Result<AddOutcome> {
        self.ensure_alive()?;
        event.normalize_timestamp();

        if event.timestamp + self.stale_threshold_ms < now {
            return Ok(AddOutcome::Rejected(RejectReason::Stale));
        }

        if is_checkout {
            self.last_checkout = Some(self.events.len());
        }
        self.events.push(event);
        Ok(AddOutcome::Added)
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn has_checkout(&self) -> bool {
        self.last_checkout.is_some()
    }

    pub(crate) fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.events.iter().map(|e| e.timestamp).min()
    }

    pub(crate) fn clear(&mut self, keep_last_checkout: bool) {
        match self.last_checkout {
            Some(index) if keep_last_checkout => {
                self.events.drain(..index);
                self.last_checkout = Some(0);
            }
            _ => {
                self.events.clear();
                self.last_checkout = None;
            }
        }
    }

    /// Copy-then-clear
    pub(crate) fn drain(&mut self) -> Result<Vec<RecordingEvent>> {
        self.ensure_alive()?;
        self.last_checkout = None;
        Ok(std::mem::take(&mut self.events))
    }

    pub(crate) fn destroy(&mut self) {
        self.events = Vec::new();
        self.last_checkout = None;
        self.destroyed = true;
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(RewindError::BufferDestroyed)
        } else {
            Ok(())
        }
    }
}

pub(crate) fn serialize_events(events: &[RecordingEvent]) -> Result<String> {
    serde_json::to_string(events)
        .map_err(|e| RewindError::BufferCorruption(format!("failed to serialize events: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;

    const NOW: Timestamp = 1_700_000_000_000;
    const STALE: Duration = Duration::from_secs(300);

    fn incremental(ts: Timestamp) -> RecordingEvent {
        RecordingEvent::incremental(ts, json!({ "source": 1 }))
    }

    #[test]
    fn stale_events_are_rejected() {
        let mut store = EventStore::new(STALE);
        let stale = incremental(NOW - 300_001);
        assert_eq!(
            store.add(stale, false, NOW).unwrap(),
            AddOutcome::Rejected(RejectReason::Stale)
        );
        assert_eq!(store.len(), 0);

        let edge = incremental(NOW - 300_000);
        assert_eq!(store.add(edge, false, NOW).unwrap(), AddOutcome::Added);
    }

    fn ordered(order: i64, timestamp: Timestamp) -> RecordingEvent {
        RecordingEvent::incremental(timestamp, json!({ "order": order }))
    }

    fn orders(store: &EventStore) -> Vec<i64> {
        store
            .events
            .iter()
            .filter_map(|e| e.data["order"].as_i64())
            .collect()
    }

    #[test]
    fn checkout_appends_after_pending_events() {
        let mut store = EventStore::new(STALE);
        store.add(incremental(NOW - 10), false, NOW).unwrap();
        store.add(incremental(NOW - 5), false, NOW).unwrap();
        assert!(!store.has_checkout());

        let snapshot = RecordingEvent::full_snapshot(NOW, json!({}));
        assert_eq!(store.add(snapshot, true, NOW).unwrap(), AddOutcome::Added);
        assert_eq!(store.len(), 3);
        assert_eq!(store.earliest_timestamp(), Some(NOW - 10));
        assert!(store.has_checkout());
    }

    #[test]
    fn clear_can_keep_last_checkout() {
        let mut store = EventStore::new(STALE);
        store.add(ordered(1, NOW), true, NOW).unwrap();
        store.add(ordered(2, NOW), false, NOW).unwrap();
        store.add(ordered(3, NOW), false, NOW).unwrap();
        store.add(ordered(4, NOW), true, NOW).unwrap();
        store.add(ordered(5, NOW), false, NOW).unwrap();
        store.add(ordered(6, NOW), true, NOW).unwrap();
        store.add(ordered(7, NOW), false, NOW).unwrap();
        assert_eq!(orders(&store), vec![1, 2, 3, 4, 5, 6, 7]);

        store.clear(true);
        assert_eq!(orders(&store), vec![6, 7]);
        assert!(store.has_checkout());

        // Kept checkout is now the first event
        store.add(ordered(8, NOW), true, NOW).unwrap();
        store.clear(true);
        assert_eq!(orders(&store), vec![8]);

        store.clear(false);
        assert_eq!(store.len(), 0);
        assert!(!store.has_checkout());
    }

    #[test]
    fn clear_without_checkout_drops_everything() {
        let mut store = EventStore::new(STALE);
        store.add(incremental(NOW), false, NOW).unwrap();
        store.clear(true);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn seconds_timestamps_are_normalized_before_stale_check() {
        let mut store = EventStore::new(STALE);
        let event = RecordingEvent::new(EventType::Meta, NOW / 1000, json!({}));
        assert_eq!(store.add(event, false, NOW).unwrap(), AddOutcome::Added);
        assert_eq!(store.earliest_timestamp(), Some(NOW));
    }

    #[test]
    fn destroyed_store_reports_errors() {
        let mut store = EventStore::new(STALE);
        store.destroy();
        assert!(matches!(
            store.add(incremental(NOW), false, NOW),
            Err(RewindError::BufferDestroyed)
        ));
        assert!(matches!(store.drain(), Err(RewindError::BufferDestroyed)));
    }
}
