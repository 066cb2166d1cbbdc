//! Simulation scripts: one JSON step per line

use anyhow::{Context, Result};
use rewind_core::prelude::*;
use serde::Deserialize;

fn incremental() -> EventType {
    EventType::IncrementalSnapshot
}

/// One scripted step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Recorder event; timestamp defaults to now
    Emit {
        #[serde(rename = "type", default = "incremental")]
        kind: EventType,
        #[serde(default)]
        timestamp: Option<Timestamp>,
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        checkout: bool,
    },
    /// Breadcrumb signal
    Breadcrumb {
        category: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Application error seen by the event processor
    Error {
        #[serde(default = "default_error_id")]
        event_id: String,
        message: String,
    },
    /// DOM mutation batch of `count` nodes
    Mutations { count: usize },
    /// Page visibility change
    Visibility { state: VisibilityState },
    /// Wait in real time
    SleepMs { ms: u64 },
    /// Flush immediately
    Flush,
}

fn default_error_id() -> String {
    "scripted-error".to_string()
}

/// Parse a script; blank lines and `#` comments are skipped
pub fn parse(source: &str) -> Result<Vec<Step>> {
    source
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid step on line {}", number))
        })
        .collect()
}
