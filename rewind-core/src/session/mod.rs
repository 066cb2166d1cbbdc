//! Session identity, sampling and persistence
//!
//! A [`Session`] is the unit a replay is attached to. The [`SessionStore`]
//! decides when an existing session is still usable, creates new ones with a
//! fresh sampling decision, and mirrors the current session into a
//! [`SessionStorage`] backend when sticky sessions are enabled.

mod sampling;
mod storage;

pub use sampling::{FixedSampler, RandomSampler, SessionSampler, decide_with};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, Timestamp};
use crate::config::{SampleRates, SessionConfig};
use crate::error::Result;

/// Sampling outcome of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleDecision {
    /// Not recorded
    #[serde(rename = "none")]
    None,
    /// Recorded and flushed throughout
    #[serde(rename = "session")]
    Continuous,
    /// Recorded into a trailing window, sent only after an error
    #[serde(rename = "buffer")]
    Buffered,
}

impl SampleDecision {
    pub fn is_sampled(&self) -> bool {
        !matches!(self, SampleDecision::None)
    }
}

/// A replay session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Replay id
    pub id: String,
    /// Creation time in epoch milliseconds
    pub started: Timestamp,
    /// Last activity in epoch milliseconds
    pub last_activity: Timestamp,
    /// Sampling outcome
    pub sampled: SampleDecision,
    /// Id of the next segment to send
    pub segment_id: u64,
    /// False once a buffered session was converted; it must not be renewed
    pub should_refresh: bool,
    /// Session this one replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
}

impl Session {
    /// New session with a random id
    pub fn new(sampled: SampleDecision, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            started: now,
            last_activity: now,
            sampled,
            segment_id: 0,
            should_refresh: true,
            previous_session_id: None,
        }
    }

    /// Whether the session was idle for longer than `idle`
    pub fn is_expired(&self, idle: Duration, now: Timestamp) -> bool {
        now - self.last_activity > duration_ms(idle)
    }

    /// Whether the session outlived `max_life` regardless of activity
    pub fn is_beyond_max_life(&self, max_life: Duration, now: Timestamp) -> bool {
        now - self.started > duration_ms(max_life)
    }

    fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.started > 0 && self.last_activity > 0
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

/// Whether a session came from storage or was just created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedKind {
    New,
    Saved,
}

/// Result of [`SessionStore::load`]
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub kind: LoadedKind,
    pub session: Session,
}

impl LoadedSession {
    pub fn is_new(&self) -> bool {
        self.kind == LoadedKind::New
    }
}

/// Loads, creates and persists sessions
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    sampler: Arc<dyn SessionSampler>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    rates: SampleRates,
}

impl SessionStore {
    /// Create a store
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        sampler: Arc<dyn SessionSampler>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        rates: SampleRates,
    ) -> Self {
        Self {
            storage,
            sampler,
            clock,
            config,
            rates,
        }
    }

    /// Session configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load the persisted (or current) session, replacing it if it is
    /// missing, malformed, idle for longer than `expiry` or past its
    /// maximum life.
    pub fn load(&self, expiry: Duration, current: Option<&Session>) -> LoadedSession {
        let now = self.clock.now_ms();
        let candidate = self.fetch().or_else(|| current.cloned());

        let mut loaded = match candidate {
            Some(session) if self.is_usable(&session, expiry, now) => LoadedSession {
                kind: LoadedKind::Saved,
                session,
            },
            Some(session) if !session.should_refresh => {
                // A converted buffer session ends with its replay
                tracing::debug!(session_id = %session.id, "Converted session expired, not renewing");
                LoadedSession {
                    kind: LoadedKind::New,
                    session: Session::new(SampleDecision::None, now),
                }
            }
            _ => LoadedSession {
                kind: LoadedKind::New,
                session: self.create(self.sampler.decide(&self.rates)),
            },
        };

        if let Some(current) = current
            && current.id != loaded.session.id
        {
            loaded.session.previous_session_id = Some(current.id.clone());
        }

        if loaded.is_new() {
            tracing::debug!(
                session_id = %loaded.session.id,
                sampled = ?loaded.session.sampled,
                "Created new replay session"
            );
            if let Err(e) = self.persist(&loaded.session) {
                tracing::warn!(error = %e, "Failed to persist new session");
            }
        }
        loaded
    }

    /// Create a session with a given decision, bypassing sampling
    pub fn create(&self, sampled: SampleDecision) -> Session {
        Session::new(sampled, self.clock.now_ms())
    }

    /// Whether `now - last_activity > idle`
    pub fn is_expired(&self, session: &Session, idle: Duration, now: Timestamp) -> bool {
        session.is_expired(idle, now)
    }

    /// Whether `now - started > max_life`
    pub fn is_beyond_max_life(&self, session: &Session, max_life: Duration, now: Timestamp) -> bool {
        session.is_beyond_max_life(max_life, now)
    }

    /// Idle or max-life expiry using the configured limits
    pub fn is_session_expired(&self, session: &Session, idle: Duration, now: Timestamp) -> bool {
        session.is_expired(idle, now) || session.is_beyond_max_life(self.config.max_session_life, now)
    }

    /// Write the session to storage when sticky; unsampled sessions are never written
    pub fn persist(&self, session: &Session) -> Result<()> {
        if !self.config.sticky || !session.sampled.is_sampled() {
            return Ok(());
        }
        let json = serde_json::to_string(session)?;
        self.storage.set(&self.config.storage_key, &json)
    }

    /// Remove persisted state
    pub fn delete(&self) -> Result<()> {
        self.storage.remove(&self.config.storage_key)
    }

    fn is_usable(&self, session: &Session, expiry: Duration, now: Timestamp) -> bool {
        session.is_valid()
            && session.sampled.is_sampled()
            && !self.is_session_expired(session, expiry, now)
    }

    fn fetch(&self) -> Option<Session> {
        if !self.config.sticky {
            return None;
        }
        let raw = match self.storage.get(&self.config.storage_key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparsable persisted session");
                None
            }
        }
    }
}
