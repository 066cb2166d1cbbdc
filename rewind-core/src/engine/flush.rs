use async_trait::async_trait;
use futures::FutureExt;

use super::{EngineInner, RecordingMode, SessionCheck};
use crate::envelope::ReplaySegment;
use crate::error::{Result, RewindError};
use crate::event::PerformanceSpan;
use crate::scheduler::{FlushGate, FlushRunner};
use crate::session::duration_ms;

/// Slack on top of the max session life before a segment counts as too long
const MAX_LIFE_SLACK_MS: i64 = 30_000;

/// Slack on top of the max session life before a flush is skipped outright
const MAX_DURATION_SLACK_MS: i64 = 5_000;

/// Gate on the replay's age: too young waits, too old is dropped
pub(crate) fn duration_gate(duration: i64, min_ms: i64, max_ms: i64) -> FlushGate {
    if duration < min_ms {
        FlushGate::Defer
    } else if duration > max_ms + MAX_DURATION_SLACK_MS {
        FlushGate::Skip
    } else {
        FlushGate::Proceed
    }
}

#[async_trait]
impl FlushRunner for EngineInner {
    fn check_flush(&self, force: bool) -> FlushGate {
        if !force && !self.state.lock().enabled {
            return FlushGate::Skip;
        }
        if self.check_and_handle_expired_session(None) != SessionCheck::Active {
            return FlushGate::Skip;
        }

        let Some(started) = self.state.lock().session.as_ref().map(|s| s.started) else {
            return FlushGate::Skip;
        };
        let duration = self.clock.now_ms() - started;
        let gate = duration_gate(
            duration,
            duration_ms(self.config.flush.effective_min_replay_duration()),
            duration_ms(self.config.session.max_session_life),
        );
        match gate {
            FlushGate::Defer => tracing::debug!(duration, "Replay too short to flush yet"),
            FlushGate::Skip => tracing::info!(duration, "Replay too long, not flushing"),
            FlushGate::Proceed => {}
        }
        gate
    }

    async fn run_flush(&self) -> Result<()> {
        let collected: Vec<PerformanceSpan> = self
            .span_sources
            .iter()
            .flat_map(|source| source.take_spans())
            .collect();
        let now = self.clock.now_ms();
        let max_life_ms = duration_ms(self.config.session.max_session_life) + MAX_LIFE_SLACK_MS;

        let (encoding, context, segment_id, session) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let (Some(session), Some(buffer)) = (state.session.as_mut(), state.buffer.as_mut())
            else {
                tracing::debug!(error = %RewindError::NoSession, "Skipping flush");
                return Ok(());
            };

            let pending = std::mem::take(&mut state.pending_spans);
            for span in pending.iter().chain(collected.iter()) {
                if let Err(e) = buffer.add_event(span.to_event(), false, now) {
                    tracing::debug!(error = %e, op = %span.op, "Dropping performance span");
                }
            }

            if !buffer.has_events() {
                return Ok(());
            }

            if session.segment_id == 0 && !buffer.has_checkout() {
                tracing::info!("Flushing initial segment without checkout");
            }
            if session.segment_id == 0 {
                state
                    .context
                    .update_initial_timestamp(buffer.earliest_timestamp());
            }
            if now - state.context.initial_timestamp > max_life_ms {
                buffer.clear(false);
                return Err(RewindError::SessionTooLong);
            }

            let encoding = buffer.finish();
            let context = state.context.pop();
            let segment_id = session.segment_id;
            session.segment_id += 1;
            (encoding, context, segment_id, session.clone())
        };

        // The counter moves before sending so a failed segment is never reused
        if let Err(e) = self.store.persist(&session) {
            tracing::warn!(error = %e, "Failed to persist session");
        }

        let recording = encoding.await.map_err(|e| match e {
            RewindError::BufferCorruption(_) | RewindError::Compression(_) => e,
            other => RewindError::BufferCorruption(other.to_string()),
        })?;

        let segment = ReplaySegment {
            replay_id: session.id.clone(),
            segment_id,
            recording,
            context,
            timestamp: now,
            include_start_timestamp: segment_id == 0,
            replay_type: session.sampled,
            rates: self.config.sampling,
        };

        tracing::debug!(
            replay_id = %segment.replay_id,
            segment_id,
            bytes = segment.recording.len(),
            "Flushing replay segment"
        );
        self.sender.send(&segment).await
    }

    fn handle_flush_error(&self, error: &RewindError) {
        if matches!(error, RewindError::Cancelled) {
            tracing::debug!("Replay send cancelled");
            return;
        }
        self.handle_exception(error);
    }
}

impl EngineInner {
    /// Flush right away unless buffering
    pub(crate) async fn conditional_flush(&self) {
        if self.state.lock().mode == RecordingMode::Buffered {
            return;
        }
        self.scheduler.flush_now().await;
    }

    /// Start sending the buffered replay on its own task unless a conversion
    /// is already under way
    pub(crate) fn start_conversion(&self) {
        let Some(inner) = self.me.upgrade() else {
            return;
        };
        let mut state = self.state.lock();
        let pending = state
            .conversion
            .as_ref()
            .is_some_and(|c| c.clone().now_or_never().is_none());
        if pending {
            return;
        }
        let task = tokio::spawn(async move { inner.send_buffered_replay_or_flush(true).await });
        let conversion = async move {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Buffered replay conversion aborted");
            }
        }
        .boxed()
        .shared();
        state.conversion = Some(conversion);
    }

    pub(crate) async fn wait_for_conversion(&self) {
        let pending = self.state.lock().conversion.clone();
        if let Some(pending) = pending {
            pending.await;
        }
    }

    pub(crate) async fn send_buffered_replay_or_flush(&self, continue_recording: bool) {
        let session = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.mode == RecordingMode::Continuous {
                None
            } else {
                if state.converting {
                    return;
                }
                let Some(session) = state.session.as_mut() else {
                    return;
                };
                state.converting = true;
                if let Some(earliest) = state.buffer.as_ref().and_then(|b| b.earliest_timestamp()) {
                    session.started = session.started.min(earliest);
                }
                session.should_refresh = false;
                Some(session.clone())
            }
        };

        let Some(session) = session else {
            self.scheduler.flush_now().await;
            return;
        };

        tracing::info!(session_id = %session.id, "Converting buffered replay to continuous");
        if let Err(e) = self.store.persist(&session) {
            tracing::warn!(error = %e, "Failed to persist session");
        }

        self.scheduler.flush_now().await;
        let was_recording = self.stop_recording();

        let now = self.clock.now_ms();
        let session = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.converting = false;
            if !continue_recording || !was_recording || state.mode == RecordingMode::Continuous {
                return;
            }
            state.mode = RecordingMode::Continuous;
            state.last_user_activity = now;
            let Some(session) = state.session.as_mut() else {
                return;
            };
            session.last_activity = now;
            session.clone()
        };

        if let Err(e) = self.store.persist(&session) {
            tracing::warn!(error = %e, "Failed to persist session");
        }
        self.start_recording();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_gate_defers_short_and_skips_long_replays() {
        let min = 4_999;
        let max = 3_600_000;
        assert_eq!(duration_gate(0, min, max), FlushGate::Defer);
        assert_eq!(duration_gate(4_998, min, max), FlushGate::Defer);
        assert_eq!(duration_gate(4_999, min, max), FlushGate::Proceed);
        assert_eq!(duration_gate(max + 5_000, min, max), FlushGate::Proceed);
        assert_eq!(duration_gate(max + 5_001, min, max), FlushGate::Skip);
    }

    #[test]
    fn zero_minimum_never_defers() {
        assert_eq!(duration_gate(0, 0, 60_000), FlushGate::Proceed);
    }
}
