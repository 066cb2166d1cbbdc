//! Zlib-compressed event buffer

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::{AddOutcome, EventBuffer, EventStore, RecordingData, serialize_events};
use crate::clock::Timestamp;
use crate::error::{Result, RewindError};
use crate::event::RecordingEvent;

/// Buffer that deflates the serialized events on a blocking worker
#[derive(Debug)]
pub struct CompressedEventBuffer {
    store: EventStore,
    level: Compression,
}

impl CompressedEventBuffer {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            store: EventStore::new(stale_threshold),
            level: Compression::default(),
        }
    }
}

fn compress(events: Vec<RecordingEvent>, level: Compression) -> Result<Vec<u8>> {
    let json = serialize_events(&events)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 4), level);
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| RewindError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| RewindError::Compression(e.to_string()))
}

impl EventBuffer for CompressedEventBuffer {
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
        let drained = self.store.drain();
        let level = self.level;
        async move {
            let events = drained?;
            let bytes = tokio::task::spawn_blocking(move || compress(events, level))
                .await
                .map_err(|e| {
                    RewindError::BufferCorruption(format!("compression worker failed: {}", e))
                })??;
            Ok(RecordingData::Compressed(bytes))
        }
        .boxed()
    }

    fn destroy(&mut self) {
        self.store.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use serde_json::json;
    use std::io::Read;

    const NOW: Timestamp = 1_700_000_000_000;

    #[tokio::test]
    async fn finish_produces_zlib_json() {
        let mut buffer = CompressedEventBuffer::new(Duration::from_secs(300));
        buffer
            .add_event(RecordingEvent::full_snapshot(NOW, json!({"node": 1})), true, NOW)
            .unwrap();
        buffer
            .add_event(RecordingEvent::incremental(NOW + 5, json!({})), false, NOW)
            .unwrap();

        let data = buffer.finish().await.unwrap();
        assert!(data.is_compressed());
        assert!(!buffer.has_events());

        let mut decoded = String::new();
        ZlibDecoder::new(data.as_bytes())
            .read_to_string(&mut decoded)
            .unwrap();
        let events: Vec<RecordingEvent> = serde_json::from_str(&decoded).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].timestamp, NOW + 5);
    }

    #[tokio::test]
    async fn finish_after_destroy_fails_loudly() {
        let mut buffer = CompressedEventBuffer::new(Duration::from_secs(300));
        buffer.destroy();
        assert!(matches!(
            buffer.finish().await,
            Err(RewindError::BufferDestroyed)
        ));
    }
}
