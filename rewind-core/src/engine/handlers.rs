use std::sync::Weak;

use super::{EngineInner, RecordingMode, SessionCheck};
use crate::buffer::{AddOutcome, RejectReason};
use crate::error::RewindError;
use crate::event::{Breadcrumb, CapturedEvent, CapturedEventKind, PerformanceSpan, RecordingEvent};
use crate::hooks::{KeyPress, Signal, SignalHook, VisibilityState};
use crate::throttle::ThrottleDecision;

/// Bridges the hook registry to an engine without keeping it alive
pub(crate) struct EngineSignalHook {
    engine: Weak<EngineInner>,
}

impl EngineSignalHook {
    pub(crate) fn new(engine: Weak<EngineInner>) -> Self {
        Self { engine }
    }
}

impl SignalHook for EngineSignalHook {
    fn on_signal(&self, signal: &Signal) {
        if let Some(engine) = self.engine.upgrade() {
            engine.handle_signal(signal);
        }
    }

    fn name(&self) -> &str {
        "replay-engine"
    }
}

impl EngineInner {
    pub(crate) fn handle_recording_emit(&self, event: RecordingEvent, is_checkout: bool) {
        if self.check_and_handle_expired_session(None) != SessionCheck::Active {
            tracing::debug!("Session not active, dropping recording event");
            return;
        }

        self.add_update(|inner| {
            let now = inner.clock.now_ms();
            if is_checkout {
                let mut state = inner.state.lock();
                if state.mode == RecordingMode::Buffered {
                    state
                        .context
                        .set_initial_state(inner.initial_url.as_deref(), now);
                }
            }

            inner.add_event(event, is_checkout);
            if !is_checkout {
                return false;
            }

            let (mode, session) = {
                let mut guard = inner.state.lock();
                let state = &mut *guard;
                let Some(session) = state.session.as_mut() else {
                    return true;
                };
                // A session replacing an expired one waits for the next
                // user action instead of sending a lone checkout
                if session.previous_session_id.is_some() {
                    return true;
                }
                if state.mode == RecordingMode::Buffered
                    && let Some(earliest) = state.buffer.as_ref().and_then(|b| b.earliest_timestamp())
                {
                    session.started = earliest;
                }
                (state.mode, session.clone())
            };

            match mode {
                RecordingMode::Buffered => {
                    if let Err(e) = inner.store.persist(&session) {
                        tracing::warn!(error = %e, "Failed to persist session");
                    }
                }
                RecordingMode::Continuous => {
                    inner.spawn(|inner| async move { inner.scheduler.flush_now().await });
                }
            }
            true
        });
    }

    /// Run `update`, then schedule a debounced flush unless it returned
    /// true or the engine is buffering
    pub(crate) fn add_update(&self, update: impl FnOnce(&Self) -> bool) {
        let skip_flush = update(self);
        let (enabled, mode) = {
            let state = self.state.lock();
            (state.enabled, state.mode)
        };
        if !enabled || skip_flush || mode == RecordingMode::Buffered {
            return;
        }
        self.scheduler.schedule();
    }

    /// Add an event to the buffer; returns whether it was buffered
    pub(crate) fn add_event(&self, mut event: RecordingEvent, is_checkout: bool) -> bool {
        let now = self.clock.now_ms();
        event.normalize_timestamp();
        let timestamp = event.timestamp;

        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.enabled || state.paused {
                tracing::debug!(paused = state.paused, "Replay not recording, dropping event");
                return false;
            }
            let Some(buffer) = state.buffer.as_mut() else {
                return false;
            };
            // The buffered window spans at most two checkouts
            if is_checkout && state.mode == RecordingMode::Buffered {
                buffer.clear(true);
            }
            let result = buffer.add_event(event, is_checkout, now);
            if matches!(result, Ok(AddOutcome::Added))
                && state.session.as_ref().is_some_and(|s| s.segment_id == 0)
            {
                state.context.observe_event(timestamp);
            }
            result
        };

        match result {
            Ok(AddOutcome::Rejected(RejectReason::Stale)) => {
                tracing::debug!(timestamp, "Skipping stale event");
                false
            }
            Ok(_) => true,
            Err(e) => {
                let error = match e {
                    RewindError::BufferCorruption(_) => e,
                    other => RewindError::BufferCorruption(other.to_string()),
                };
                self.handle_exception(&error);
                false
            }
        }
    }

    /// Add a synthetic breadcrumb or span event under the rate limit
    pub(crate) fn throttled_add_event(&self, event: RecordingEvent) -> bool {
        let now = self.clock.now_ms();
        let decision = self.state.lock().throttle.check(now);
        match decision {
            ThrottleDecision::Allow => self.add_event(event, false),
            ThrottleDecision::Throttled => {
                tracing::debug!("Throttling replay events");
                let marker = Breadcrumb::new("replay.throttled", now);
                self.add_event(marker.to_event(), false);
                false
            }
            ThrottleDecision::Skipped => false,
        }
    }

    pub(crate) fn process_event(&self, mut event: CapturedEvent) -> CapturedEvent {
        if matches!(event.kind, CapturedEventKind::Replay | CapturedEventKind::Other) {
            return event;
        }

        let (replay_id, mode) = {
            let state = self.state.lock();
            match state.session.as_ref() {
                Some(session) if state.enabled => (session.id.clone(), state.mode),
                _ => return event,
            }
        };

        // Buffered replays may never be sent; do not point transactions at them
        if event.kind == CapturedEventKind::Transaction && mode == RecordingMode::Buffered {
            return event;
        }

        event.tags.insert("replay_id".to_string(), replay_id);

        match event.kind {
            CapturedEventKind::Transaction => {
                if let Some(trace_id) = &event.trace_id {
                    self.state.lock().context.trace_ids.insert(trace_id.clone());
                }
            }
            CapturedEventKind::Error => {
                self.state
                    .lock()
                    .context
                    .error_ids
                    .insert(event.event_id.clone());

                let own_failure = event
                    .exception_messages
                    .iter()
                    .any(|m| m.starts_with(crate::UNABLE_TO_SEND_REPLAY));
                if mode == RecordingMode::Buffered && !own_failure {
                    tracing::info!(event_id = %event.event_id, "Error captured, sending buffered replay");
                    self.start_conversion();
                }
            }
            _ => {}
        }
        event
    }

    pub(crate) fn handle_signal(&self, signal: &Signal) {
        if !self.state.lock().enabled {
            return;
        }

        match signal {
            Signal::Breadcrumb(crumb) => self.handle_breadcrumb(crumb.clone()),
            Signal::Span(span) => self.handle_span(span.clone()),
            Signal::Performance(spans) => {
                self.state.lock().pending_spans.extend(spans.iter().cloned());
            }
            Signal::Visibility(VisibilityState::Visible) => self.foreground(None),
            Signal::Visibility(VisibilityState::Hidden) => self.background(None),
            Signal::Focus => {
                let crumb = Breadcrumb::new("ui.focus", self.clock.now_ms());
                self.foreground(Some(crumb));
            }
            Signal::Blur => {
                let crumb = Breadcrumb::new("ui.blur", self.clock.now_ms());
                self.background(Some(crumb));
            }
            Signal::KeyDown(press) => self.handle_key_down(press),
        }
    }

    fn handle_breadcrumb(&self, crumb: Breadcrumb) {
        match crumb.category.as_str() {
            "sentry.transaction" => return,
            "ui.click" => self.trigger_user_activity(),
            _ => {
                self.check_and_handle_expired_session(None);
            }
        }

        // Console output alone does not warrant a flush
        let is_console = crumb.category == "console";
        self.add_update(move |inner| {
            inner.throttled_add_event(crumb.to_event());
            is_console
        });
    }

    fn handle_span(&self, span: PerformanceSpan) {
        if span.is_navigation() {
            self.state.lock().context.urls.push(span.description.clone());
            self.trigger_user_activity();
        }

        // Polling requests must not keep the session alive
        let is_network = span.is_network_request();
        self.add_update(move |inner| {
            inner.throttled_add_event(span.to_event());
            is_network
        });
    }

    fn handle_key_down(&self, press: &KeyPress) {
        self.update_user_activity();
        if !press.is_recordable() {
            return;
        }

        let crumb = Breadcrumb::new("ui.keyDown", self.clock.now_ms())
            .with_message(press.target.clone().unwrap_or_else(|| press.key.clone()))
            .with_data("key", serde_json::Value::String(press.key.clone()))
            .with_data("hasModifier", serde_json::Value::Bool(press.has_modifier));
        self.handle_breadcrumb(crumb);
    }

    fn foreground(&self, crumb: Option<Breadcrumb>) {
        let timeout = self.config.session.visibility_change_timeout;
        if self.check_and_handle_expired_session(Some(timeout)) != SessionCheck::Active {
            tracing::info!("Document has become active, but session has expired");
            return;
        }
        if let Some(crumb) = crumb {
            self.add_update(move |inner| {
                inner.add_event(crumb.to_event(), false);
                false
            });
        }
    }

    fn background(&self, crumb: Option<Breadcrumb>) {
        let now = self.clock.now_ms();
        let timeout = self.config.session.visibility_change_timeout;
        let expired = self
            .state
            .lock()
            .session
            .as_ref()
            .is_none_or(|s| self.store.is_session_expired(s, timeout, now));

        if !expired && let Some(crumb) = crumb {
            self.add_update(move |inner| {
                inner.add_event(crumb.to_event(), false);
                false
            });
        }

        self.spawn(|inner| async move { inner.conditional_flush().await });
    }

    /// React to a mutation batch of `count` nodes; returns false when the
    /// recorder should drop the batch
    pub(crate) fn handle_mutations(&self, count: usize) -> bool {
        let limits = &self.config.mutations;
        let over_limit = limits.exceeds_limit(count);
        if over_limit || limits.exceeds_breadcrumb_limit(count) {
            let crumb = Breadcrumb::new("replay.mutations", self.clock.now_ms())
                .with_data("count", serde_json::Value::from(count))
                .with_data("limit", serde_json::Value::Bool(over_limit));
            self.add_update(move |inner| {
                inner.add_event(crumb.to_event(), false);
                false
            });
        }

        if !over_limit {
            return true;
        }

        let flush = self.state.lock().mode == RecordingMode::Continuous;
        tracing::warn!(count, limit = limits.limit, "Mutation limit exceeded, stopping replay");
        self.spawn(move |inner| async move { inner.stop(flush).await });
        false
    }

    /// Single sink for pipeline errors
    pub(crate) fn handle_exception(&self, error: &RewindError) {
        if error.is_send_error() {
            tracing::warn!(error = %error, "Dropping replay segment");
        } else {
            tracing::error!(error = %error, "Replay pipeline error");
        }

        if self.config.capture_exceptions
            && let Some(reporter) = &self.reporter
        {
            reporter.report(error);
        }

        if error.is_fatal() {
            tracing::warn!("Stopping replay after fatal error");
            self.spawn(|inner| async move { inner.stop(false).await });
        }
    }
}
