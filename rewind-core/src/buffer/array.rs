//! Uncompressed event buffer

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{AddOutcome, EventBuffer, EventStore, RecordingData, serialize_events};
use crate::clock::Timestamp;
use crate::error::Result;
use crate::event::RecordingEvent;

/// Buffer that sends events as a plain JSON array
#[derive(Debug)]
pub struct ArrayEventBuffer {
    store: EventStore,
}

impl ArrayEventBuffer {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            store: EventStore::new(stale_threshold),
        }
    }
}

impl EventBuffer for ArrayEventBuffer {
    fn add_event(
        &mut self,
        event: RecordingEvent,
        is_checkout: bool,
        now: Timestamp,
    ) -> Result<AddOutcome> {
        self.store.add(event, is_checkout, now)
    }

    fn has_events(&self) -> bool {
        self.store.len() > 0
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn has_checkout(&self) -> bool {
        self.store.has_checkout()
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.store.earliest_timestamp()
    }

    fn clear(&mut self, keep_last_checkout: bool) {
        self.store.clear(keep_last_checkout);
    }

    fn finish(&mut self) -> BoxFuture<'static, Result<RecordingData>> {
        let encoded = self
            .store
            .drain()
            .and_then(|events| serialize_events(&events))
            .map(RecordingData::Text);
        futures::future::ready(encoded).boxed()
    }

    fn destroy(&mut self) {
        self.store.destroy();
    }
}
