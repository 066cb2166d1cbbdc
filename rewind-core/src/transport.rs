//! Delivery of assembled envelopes

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::envelope::ReplayEnvelope;

/// Transport-level failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The receiving side is gone
    #[error("Transport closed")]
    Closed,

    /// Any other delivery failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Response from the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status_code: u16,
}

impl TransportResponse {
    pub fn ok() -> Self {
        Self { status_code: 200 }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Delivers envelopes to the collector.
///
/// `Ok(None)` and `Err` both count as a failed attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        envelope: ReplayEnvelope,
    ) -> Result<Option<TransportResponse>, TransportError>;
}

/// Forwards envelopes over a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<ReplayEnvelope>,
}

impl ChannelTransport {
    /// Create a transport and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReplayEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(
        &self,
        envelope: ReplayEnvelope,
    ) -> Result<Option<TransportResponse>, TransportError> {
        self.tx
            .send(envelope)
            .map_err(|_| TransportError::Closed)?;
        Ok(Some(TransportResponse::ok()))
    }
}

/// Parse a recording body, inflating it first when it is zlib-compressed
fn decode_recording(body: &[u8]) -> anyhow::Result<serde_json::Value> {
    if let Ok(events) = serde_json::from_slice(body) {
        return Ok(events);
    }
    let mut json = Vec::with_capacity(body.len() * 4);
    ZlibDecoder::new(body)
        .read_to_end(&mut json)
        .context("recording is neither JSON nor zlib")?;
    serde_json::from_slice(&json).context("inflated recording is not JSON")
}

/// Appends each envelope's event and decoded recording events as one JSON
/// line to a file
#[derive(Debug, Clone)]
pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(
        &self,
        envelope: ReplayEnvelope,
    ) -> Result<Option<TransportResponse>, TransportError> {
        let recording = decode_recording(envelope.recording_body())?;
        let line = serde_json::json!({
            "header": envelope.header,
            "event": envelope.event,
            "recording": recording,
        });
        let mut bytes = serde_json::to_vec(&line).map_err(anyhow::Error::from)?;
        bytes.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(anyhow::Error::from)?;
        file.write_all(&bytes).await.map_err(anyhow::Error::from)?;
        file.flush().await.map_err(anyhow::Error::from)?;

        Ok(Some(TransportResponse::ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RecordingData;
    use crate::config::SampleRates;
    use crate::context::PopEventContext;
    use crate::envelope::{ReplaySegment, SdkInfo};
    use crate::session::SampleDecision;

    fn envelope() -> ReplayEnvelope {
        envelope_with(RecordingData::Text("[]".into()))
    }

    fn envelope_with(recording: RecordingData) -> ReplayEnvelope {
        let segment = ReplaySegment {
            replay_id: "r1".into(),
            segment_id: 0,
            recording,
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
        };
        ReplayEnvelope::from_segment(&segment, &SdkInfo::default()).unwrap()
    }

    #[tokio::test]
    async fn channel_transport_reports_closed_receiver() {
        let (transport, mut rx) = ChannelTransport::new();
        let response = transport.send(envelope()).await.unwrap();
        assert_eq!(response, Some(TransportResponse::ok()));
        assert_eq!(rx.recv().await.unwrap().event.replay_id, "r1");

        drop(rx);
        assert!(matches!(
            transport.send(envelope()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn file_transport_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let transport = FileTransport::new(&path);

        transport.send(envelope()).await.unwrap();
        transport.send(envelope()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["recording"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn file_transport_inflates_compressed_recordings() {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let events = serde_json::json!([{ "type": 2, "timestamp": 1_700_000_000_000_i64, "data": {} }]);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(events.to_string().as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let transport = FileTransport::new(&path);
        transport
            .send(envelope_with(RecordingData::Compressed(compressed)))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(line["recording"], events);
    }

    #[tokio::test]
    async fn file_transport_rejects_garbage_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path().join("out.jsonl"));
        let result = transport
            .send(envelope_with(RecordingData::Compressed(vec![0xde, 0xad, 0xbe, 0xef])))
            .await;
        assert!(matches!(result, Err(TransportError::Other(_))));
    }
}
