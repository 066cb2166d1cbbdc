//! Per-segment metadata accumulated between flushes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Accumulator for the segment currently being recorded
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Error events observed during the segment
    pub error_ids: BTreeSet<String>,
    /// Transactions observed during the segment
    pub trace_ids: BTreeSet<String>,
    /// Visited URLs in order
    pub urls: Vec<String>,
    /// Earliest event timestamp seen in the first segment
    pub earliest_event: Option<Timestamp>,
    /// Reported start of the replay
    pub initial_timestamp: Timestamp,
    /// URL at recording start
    pub initial_url: String,
}

/// Snapshot handed to the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopEventContext {
    pub initial_timestamp: Timestamp,
    pub initial_url: String,
    pub error_ids: Vec<String>,
    pub trace_ids: Vec<String>,
    pub urls: Vec<String>,
}

impl EventContext {
    /// Fresh context starting at `now`
    pub fn new(now: Timestamp) -> Self {
        Self {
            initial_timestamp: now,
            ..Default::default()
        }
    }

    /// Reset for a new recording run
    pub fn set_initial_state(&mut self, url: Option<&str>, now: Timestamp) {
        self.clear();
        self.earliest_event = None;
        self.initial_timestamp = now;
        if let Some(url) = url {
            self.initial_url = url.to_string();
            self.urls.push(url.to_string());
        }
    }

    /// Record an event timestamp of the first segment
    pub fn observe_event(&mut self, timestamp: Timestamp) {
        self.earliest_event = Some(match self.earliest_event {
            Some(earliest) => earliest.min(timestamp),
            None => timestamp,
        });
    }

    /// Pull the reported start back to an earlier buffered event
    pub fn update_initial_timestamp(&mut self, earliest: Option<Timestamp>) {
        if let Some(earliest) = earliest {
            self.initial_timestamp = self.initial_timestamp.min(earliest);
        }
    }

    /// Snapshot and clear the per-segment fields.
    ///
    /// `initial_timestamp` and `initial_url` survive the pop.
    pub fn pop(&mut self) -> PopEventContext {
        let earliest = self.earliest_event.take();
        self.update_initial_timestamp(earliest);

        let popped = PopEventContext {
            initial_timestamp: self.initial_timestamp,
            initial_url: self.initial_url.clone(),
            error_ids: self.error_ids.iter().cloned().collect(),
            trace_ids: self.trace_ids.iter().cloned().collect(),
            urls: std::mem::take(&mut self.urls),
        };
        self.clear();
        popped
    }

    /// Clear ids and urls
    pub fn clear(&mut self) {
        self.error_ids.clear();
        self.trace_ids.clear();
        self.urls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_never_reports_a_start_after_the_earliest_event() {
        for order in [[300, 100, 200], [100, 300, 200], [200, 300, 100]] {
            let mut context = EventContext::new(1_000);
            for offset in order {
                context.observe_event(500 + offset);
            }
            let earliest = context.earliest_event.unwrap();

            let popped = context.pop();
            assert!(popped.initial_timestamp <= earliest);
            assert_eq!(popped.initial_timestamp, 600);
        }
    }

    #[test]
    fn pop_clears_segment_fields_but_keeps_start() {
        let mut context = EventContext::new(1_000);
        context.set_initial_state(Some("https://example.com/"), 1_000);
        context.error_ids.insert("err-1".into());
        context.trace_ids.insert("trace-1".into());

        let popped = context.pop();
        assert_eq!(popped.urls, vec!["https://example.com/".to_string()]);
        assert_eq!(popped.error_ids, vec!["err-1".to_string()]);

        let second = context.pop();
        assert!(second.error_ids.is_empty());
        assert!(second.urls.is_empty());
        assert_eq!(second.initial_timestamp, 1_000);
        assert_eq!(second.initial_url, "https://example.com/");
    }
}
