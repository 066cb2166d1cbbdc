use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::handlers::EngineSignalHook;
use super::{EngineInner, RecordingMode, SessionCheck};
use crate::buffer::EventBuffer;
use crate::clock::Timestamp;
use crate::error::{Result, RewindError};
use crate::hooks::SignalKind;
use crate::recorder::{RecorderOptions, RecordingEmitter};
use crate::session::{SampleDecision, Session, duration_ms};

/// Buffered only while a buffer-sampled session has not sent anything yet
pub(crate) fn mode_for(session: &Session) -> RecordingMode {
    if session.sampled == SampleDecision::Buffered && session.segment_id == 0 {
        RecordingMode::Buffered
    } else {
        RecordingMode::Continuous
    }
}

impl EngineInner {
    pub(crate) fn initialize_sampling(&self) {
        let current = {
            let state = self.state.lock();
            if state.enabled {
                tracing::debug!("Replay already initialized");
                return;
            }
            state.session.clone()
        };

        let loaded = self
            .store
            .load(self.config.session.idle_expiry, current.as_ref());
        if !loaded.session.sampled.is_sampled() {
            tracing::info!(session_id = %loaded.session.id, "Session not sampled, not recording");
            return;
        }
        self.begin(loaded.session);
    }

    pub(crate) fn start_with_mode(&self, mode: RecordingMode) -> Result<()> {
        if self.state.lock().enabled {
            return Err(RewindError::AlreadyRecording);
        }

        let decision = match mode {
            RecordingMode::Buffered => SampleDecision::Buffered,
            RecordingMode::Continuous => SampleDecision::Continuous,
        };
        let session = self.store.create(decision);
        if let Err(e) = self.store.persist(&session) {
            tracing::warn!(error = %e, "Failed to persist session");
        }
        self.begin(session);
        Ok(())
    }

    /// Install a sampled session and start recording it
    fn begin(&self, session: Session) {
        let now = self.clock.now_ms();
        let mode = mode_for(&session);
        let session_id = session.id.clone();
        {
            let mut state = self.state.lock();
            state.context.set_initial_state(self.initial_url.as_deref(), now);
            state.session = Some(session);
            state.buffer = Some(self.new_buffer());
            state.mode = mode;
            state.enabled = true;
            state.paused = false;
            state.converting = false;
            state.conversion = None;
            state.last_user_activity = now;
            state.throttle.reset();
            state.pending_spans.clear();
        }

        let hook = Arc::new(EngineSignalHook::new(self.me.clone()));
        let handle = self.hooks.register(SignalKind::ALL, hook);
        let previous = self.state.lock().hook_handle.replace(handle);
        if let Some(previous) = previous {
            self.hooks.unregister(previous);
        }

        tracing::info!(session_id = %session_id, mode = ?mode, "Starting replay");
        self.start_recording();
    }

    pub(crate) async fn stop(&self, force_flush: bool) {
        // An error-triggered conversion still owns the buffered events
        self.wait_for_conversion().await;

        let handle = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.hook_handle.take()
        };

        tracing::info!(force_flush, "Stopping replay");
        if let Some(handle) = handle {
            self.hooks.unregister(handle);
        }
        self.stop_recording();
        self.scheduler.cancel();

        if force_flush {
            self.scheduler.flush(true).await;
        }
        self.sender.cancel();

        {
            let mut state = self.state.lock();
            if let Some(mut buffer) = state.buffer.take() {
                buffer.destroy();
            }
            state.session = None;
            state.paused = false;
            state.converting = false;
        }
        if let Err(e) = self.store.delete() {
            tracing::warn!(error = %e, "Failed to delete persisted session");
        }
    }

    pub(crate) fn pause(&self) {
        {
            let mut state = self.state.lock();
            if state.paused {
                return;
            }
            state.paused = true;
        }
        self.stop_recording();
        tracing::info!("Pausing replay");
    }

    pub(crate) fn resume(&self) {
        {
            let mut state = self.state.lock();
            if !state.paused || !state.enabled {
                return;
            }
            state.paused = false;
        }
        tracing::info!("Resuming replay");
        self.start_recording();
    }

    pub(crate) fn start_recording(&self) {
        let options = {
            let mut state = self.state.lock();
            if state.buffer.is_none() {
                state.buffer = Some(self.new_buffer());
            }
            state.recording = true;
            RecorderOptions {
                checkout_every: (state.mode == RecordingMode::Buffered)
                    .then_some(self.config.buffer.checkout_interval),
            }
        };

        let me = self.me.clone();
        let on_mutation = self.me.clone();
        let emitter = RecordingEmitter::new(move |event, is_checkout| {
            if let Some(inner) = me.upgrade() {
                inner.handle_recording_emit(event, is_checkout);
            }
        })
        .with_mutation_handler(move |count| {
            on_mutation
                .upgrade()
                .is_none_or(|inner| inner.handle_mutations(count))
        });

        if let Err(e) = self.recorder.start(options, emitter) {
            self.state.lock().recording = false;
            self.handle_exception(&e);
        }
    }

    pub(crate) fn new_buffer(&self) -> Box<dyn EventBuffer> {
        (self.buffer_factory)(&self.config.buffer)
    }

    /// Stop the recorder; returns whether it was running
    pub(crate) fn stop_recording(&self) -> bool {
        let was_recording = std::mem::replace(&mut self.state.lock().recording, false);
        if was_recording {
            self.recorder.stop();
        }
        was_recording
    }

    pub(crate) fn check_and_handle_expired_session(&self, expiry: Option<Duration>) -> SessionCheck {
        let now = self.clock.now_ms();
        let expiry = expiry.unwrap_or(self.config.session.idle_expiry);
        let (current, enabled, last_user_activity) = {
            let state = self.state.lock();
            (state.session.clone(), state.enabled, state.last_user_activity)
        };
        let Some(current) = current else {
            return SessionCheck::Missing;
        };
        let expired = self.store.is_session_expired(&current, expiry, now);

        // A stopped engine never renews its session
        if !enabled {
            return if expired {
                SessionCheck::Missing
            } else {
                SessionCheck::Active
            };
        }

        // Non-user activity alone must not keep starting new sessions
        if now - last_user_activity > duration_ms(self.config.session.max_session_life) {
            self.pause();
            return SessionCheck::Paused;
        }

        if !expired {
            return SessionCheck::Active;
        }

        match self.renew_session(&current, expiry) {
            Some(session) => {
                self.refresh_session(session);
                SessionCheck::Refreshed
            }
            None => SessionCheck::Active,
        }
    }

    /// Load a replacement for `current`; `None` if storage still holds it as valid
    fn renew_session(&self, current: &Session, expiry: Duration) -> Option<Session> {
        let loaded = self.store.load(expiry, Some(current));
        (loaded.session.id != current.id).then_some(loaded.session)
    }

    /// Swap in a new session after expiry
    fn refresh_session(&self, session: Session) {
        let now = self.clock.now_ms();

        if !session.sampled.is_sampled() {
            tracing::info!(session_id = %session.id, "Refreshed session not sampled, stopping replay");
            self.state.lock().session = Some(session);
            self.spawn(|inner| async move { inner.stop(false).await });
            return;
        }

        let mode = mode_for(&session);
        let session_id = session.id.clone();
        let (recording, mode_changed) = {
            let mut state = self.state.lock();
            state.session = Some(session);
            state.context.set_initial_state(self.initial_url.as_deref(), now);
            if let Some(buffer) = state.buffer.as_mut() {
                buffer.clear(false);
            }
            state.converting = false;
            let mode_changed = state.mode != mode;
            state.mode = mode;
            (state.recording && !state.paused, mode_changed)
        };

        tracing::info!(session_id = %session_id, mode = ?mode, "Session expired, started a new one");

        if recording {
            if mode_changed {
                self.stop_recording();
                self.start_recording();
            } else {
                self.recorder.take_full_snapshot();
            }
        }
    }

    pub(crate) fn trigger_user_activity(&self) {
        let now = self.clock.now_ms();
        let (enabled, inactive, current) = {
            let mut state = self.state.lock();
            state.last_user_activity = now;
            (state.enabled, state.paused || !state.recording, state.session.clone())
        };
        if !enabled {
            return;
        }

        if !inactive {
            if self.check_and_handle_expired_session(None) == SessionCheck::Active {
                self.touch_session(now);
            }
            return;
        }

        // Paused: only a real user action brings the recording back
        if let Some(current) = current {
            let idle = self.config.session.idle_expiry;
            let renewed = self
                .store
                .is_session_expired(&current, idle, now)
                .then(|| self.renew_session(&current, idle))
                .flatten();
            match renewed {
                Some(session) => self.refresh_session(session),
                None => self.touch_session(now),
            }
        }
        self.resume();
    }

    pub(crate) fn update_user_activity(&self) {
        let now = self.clock.now_ms();
        self.state.lock().last_user_activity = now;
        self.touch_session(now);
    }

    fn touch_session(&self, now: Timestamp) {
        let session = {
            let mut state = self.state.lock();
            let Some(session) = state.session.as_mut() else {
                return;
            };
            session.last_activity = now;
            session.clone()
        };
        if let Err(e) = self.store.persist(&session) {
            tracing::warn!(error = %e, "Failed to persist session activity");
        }
    }

    /// Run engine work on its own task
    pub(crate) fn spawn<F, Fut>(&self, work: F)
    where
        F: FnOnce(Arc<EngineInner>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(inner) = self.me.upgrade() {
            tokio::spawn(work(inner));
        }
    }
}
