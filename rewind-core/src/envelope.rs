//! Segment payload and the envelope it is delivered in

use serde::{Deserialize, Serialize};

use crate::buffer::RecordingData;
use crate::clock::Timestamp;
use crate::config::SampleRates;
use crate::context::PopEventContext;
use crate::error::Result;
use crate::session::SampleDecision;

/// SDK identification carried in every envelope header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
}

impl Default for SdkInfo {
    fn default() -> Self {
        Self {
            name: "rewind".to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// One flushed segment, as handed to the sender
#[derive(Debug, Clone)]
pub struct ReplaySegment {
    pub replay_id: String,
    pub segment_id: u64,
    pub recording: RecordingData,
    pub context: PopEventContext,
    /// Flush time in epoch milliseconds
    pub timestamp: Timestamp,
    /// Only the first segment reports the replay start
    pub include_start_timestamp: bool,
    pub replay_type: SampleDecision,
    pub rates: SampleRates,
}

/// Tags attached to the replay event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayTags {
    pub session_sample_rate: f64,
    pub error_sample_rate: f64,
    pub replay_type: String,
}

/// Metadata item of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub replay_id: String,
    pub segment_id: u64,
    /// Seconds since the epoch
    pub timestamp: f64,
    /// Seconds since the epoch, first segment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_start_timestamp: Option<f64>,
    pub error_ids: Vec<String>,
    pub trace_ids: Vec<String>,
    pub urls: Vec<String>,
    pub replay_type: String,
    pub tags: ReplayTags,
}

/// Envelope header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub event_id: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub sdk: SdkInfo,
}

/// Envelope delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEnvelope {
    pub header: EnvelopeHeader,
    pub event: ReplayEvent,
    /// `{"segment_id":N}\n` followed by the recording bytes
    pub recording: Vec<u8>,
}

fn replay_type_name(decision: SampleDecision) -> &'static str {
    match decision {
        SampleDecision::Buffered => "buffer",
        SampleDecision::Continuous | SampleDecision::None => "session",
    }
}

fn seconds(ms: Timestamp) -> f64 {
    ms as f64 / 1000.0
}

impl ReplayEnvelope {
    /// Assemble the envelope for `segment`
    pub fn from_segment(segment: &ReplaySegment, sdk: &SdkInfo) -> Result<Self> {
        let replay_type = replay_type_name(segment.replay_type).to_string();

        let event = ReplayEvent {
            kind: "replay_event".to_string(),
            replay_id: segment.replay_id.clone(),
            segment_id: segment.segment_id,
            timestamp: seconds(segment.timestamp),
            replay_start_timestamp: segment
                .include_start_timestamp
                .then(|| seconds(segment.context.initial_timestamp)),
            error_ids: segment.context.error_ids.clone(),
            trace_ids: segment.context.trace_ids.clone(),
            urls: segment.context.urls.clone(),
            replay_type: replay_type.clone(),
            tags: ReplayTags {
                session_sample_rate: segment.rates.session_sample_rate,
                error_sample_rate: segment.rates.error_sample_rate,
                replay_type,
            },
        };

        let mut recording = serde_json::to_vec(&serde_json::json!({
            "segment_id": segment.segment_id
        }))?;
        recording.push(b'\n');
        recording.extend_from_slice(segment.recording.as_bytes());

        let sent_at = chrono::DateTime::from_timestamp_millis(segment.timestamp)
            .unwrap_or_else(chrono::Utc::now);

        Ok(Self {
            header: EnvelopeHeader {
                event_id: segment.replay_id.clone(),
                sent_at,
                sdk: sdk.clone(),
            },
            event,
            recording,
        })
    }

    /// Newline-delimited wire form: header, then one header/payload pair per item
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec(&self.header)?;
        out.push(b'\n');

        out.extend(serde_json::to_vec(&serde_json::json!({ "type": "replay_event" }))?);
        out.push(b'\n');
        out.extend(serde_json::to_vec(&self.event)?);
        out.push(b'\n');

        out.extend(serde_json::to_vec(&serde_json::json!({
            "type": "replay_recording",
            "length": self.recording.len(),
        }))?);
        out.push(b'\n');
        out.extend_from_slice(&self.recording);
        Ok(out)
    }

    /// Recording bytes without the segment header line
    pub fn recording_body(&self) -> &[u8] {
        match self.recording.iter().position(|b| *b == b'\n') {
            Some(newline) => &self.recording[newline + 1..],
            None => &[],
        }
    }
}
