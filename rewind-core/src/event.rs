//! Recording events and the signal records converted into them
//!
//! Recorder output is kept opaque (`data` is arbitrary JSON); only the
//! numeric event type and the timestamp matter to the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::Timestamp;

/// Largest value still interpreted as seconds rather than milliseconds
const MAX_SECONDS_TIMESTAMP: Timestamp = 9_999_999_999;

/// Recorder event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventType {
    DomContentLoaded,
    Load,
    /// Full-state snapshot
    FullSnapshot,
    /// Incremental delta
    IncrementalSnapshot,
    Meta,
    /// Breadcrumbs, spans and other synthetic entries
    Custom,
    Plugin,
}

impl From<EventType> for u8 {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::DomContentLoaded => 0,
            EventType::Load => 1,
            EventType::FullSnapshot => 2,
            EventType::IncrementalSnapshot => 3,
            EventType::Meta => 4,
            EventType::Custom => 5,
            EventType::Plugin => 6,
        }
    }
}

impl TryFrom<u8> for EventType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => EventType::DomContentLoaded,
            1 => EventType::Load,
            2 => EventType::FullSnapshot,
            3 => EventType::IncrementalSnapshot,
            4 => EventType::Meta,
            5 => EventType::Custom,
            6 => EventType::Plugin,
            other => return Err(format!("unknown recording event type {}", other)),
        })
    }
}

/// A single timestamped recording event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEvent {
    /// Epoch milliseconds (seconds are accepted and normalized on insert)
    pub timestamp: Timestamp,

    /// Recorder event type
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Opaque payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RecordingEvent {
    /// Create an event
    pub fn new(kind: EventType, timestamp: Timestamp, data: serde_json::Value) -> Self {
        Self {
            timestamp,
            kind,
            data,
        }
    }

    /// Create a full snapshot event
    pub fn full_snapshot(timestamp: Timestamp, data: serde_json::Value) -> Self {
        Self::new(EventType::FullSnapshot, timestamp, data)
    }

    /// Create an incremental event
    pub fn incremental(timestamp: Timestamp, data: serde_json::Value) -> Self {
        Self::new(EventType::IncrementalSnapshot, timestamp, data)
    }

    /// Create a custom event carrying `payload` under `tag`
    pub fn custom(tag: &str, timestamp: Timestamp, payload: serde_json::Value) -> Self {
        Self::new(
            EventType::Custom,
            timestamp,
            serde_json::json!({ "tag": tag, "payload": payload }),
        )
    }

    /// Tag of a custom event, if any
    pub fn tag(&self) -> Option<&str> {
        if self.kind != EventType::Custom {
            return None;
        }
        self.data.get("tag").and_then(|t| t.as_str())
    }

    /// Rewrite a seconds timestamp into milliseconds
    pub fn normalize_timestamp(&mut self) {
        self.timestamp = normalize_timestamp(self.timestamp);
    }
}

/// Interpret small timestamps as seconds
pub fn normalize_timestamp(timestamp: Timestamp) -> Timestamp {
    if timestamp <= MAX_SECONDS_TIMESTAMP {
        timestamp * 1000
    } else {
        timestamp
    }
}

/// Breadcrumb delivered by a signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    /// Category such as `ui.click` or `navigation`
    pub category: String,

    /// Epoch milliseconds
    pub timestamp: Timestamp,

    /// Optional human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Structured data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl Breadcrumb {
    /// Create a breadcrumb with no message or data
    pub fn new(category: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            category: category.into(),
            timestamp,
            message: None,
            data: BTreeMap::new(),
        }
    }

    /// Attach a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Convert into a custom recording event tagged `breadcrumb`
    pub fn to_event(&self) -> RecordingEvent {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RecordingEvent::custom("breadcrumb", normalize_timestamp(self.timestamp), payload)
    }
}

/// Performance span delivered by a signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSpan {
    /// Operation such as `navigation.push` or `resource.fetch`
    pub op: String,

    /// URL or name
    pub description: String,

    /// Epoch milliseconds
    pub start_timestamp: Timestamp,

    /// Epoch milliseconds
    pub end_timestamp: Timestamp,

    /// Structured data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl PerformanceSpan {
    /// Create a span
    pub fn new(
        op: impl Into<String>,
        description: impl Into<String>,
        start_timestamp: Timestamp,
        end_timestamp: Timestamp,
    ) -> Self {
        Self {
            op: op.into(),
            description: description.into(),
            start_timestamp,
            end_timestamp,
            data: BTreeMap::new(),
        }
    }

    /// Network polling spans must not keep a session alive
    pub fn is_network_request(&self) -> bool {
        matches!(self.op.as_str(), "resource.fetch" | "resource.xhr")
    }

    /// History navigation
    pub fn is_navigation(&self) -> bool {
        self.op == "navigation.push"
    }

    /// Convert into a custom recording event tagged `performanceSpan`
    pub fn to_event(&self) -> RecordingEvent {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RecordingEvent::custom(
            "performanceSpan",
            normalize_timestamp(self.start_timestamp),
            payload,
        )
    }
}

/// Kind of an application event passing through the global processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturedEventKind {
    /// Error or exception
    Error,
    /// Performance transaction
    Transaction,
    /// The replay event itself
    Replay,
    /// Anything else
    Other,
}

/// An application event observed by the engine's global event processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Event id
    pub event_id: String,

    /// Event kind
    pub kind: CapturedEventKind,

    /// Exception messages, for errors
    #[serde(default)]
    pub exception_messages: Vec<String>,

    /// Trace id, for transactions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Tags, including `replay_id` once processed
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// An error event carrying one exception message
    pub fn error(event_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            kind: CapturedEventKind::Error,
            exception_messages: vec![message.into()],
            trace_id: None,
            tags: BTreeMap::new(),
        }
    }

    /// A transaction event
    pub fn transaction(event_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            kind: CapturedEventKind::Transaction,
            exception_messages: Vec::new(),
            trace_id: Some(trace_id.into()),
            tags: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_as_number() {
        let event = RecordingEvent::full_snapshot(1_700_000_000_000, serde_json::json!({}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], 2);

        let back: RecordingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, EventType::FullSnapshot);
        assert!(serde_json::from_str::<RecordingEvent>(r#"{"timestamp":1,"type":42}"#).is_err());
    }

    #[test]
    fn seconds_are_normalized() {
        assert_eq!(normalize_timestamp(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp(1_700_000_000_000), 1_700_000_000_000);
    }

    #[test]
    fn breadcrumb_becomes_tagged_custom_event() {
        let crumb = Breadcrumb::new("ui.click", 1_700_000_000_500).with_message("button#buy");
        let event = crumb.to_event();

        assert_eq!(event.kind, EventType::Custom);
        assert_eq!(event.tag(), Some("breadcrumb"));
        assert_eq!(event.data["payload"]["category"], "ui.click");
        assert_eq!(event.timestamp, 1_700_000_000_500);
    }

    #[test]
    fn network_spans_are_recognized() {
        let span = PerformanceSpan::new("resource.fetch", "/api", 1, 2);
        assert!(span.is_network_request());
        assert_eq!(span.to_event().tag(), Some("performanceSpan"));
        assert!(!PerformanceSpan::new("navigation.push", "/next", 1, 1).is_network_request());
    }
}
