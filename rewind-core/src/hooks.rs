//! Signal hook registry
//!
//! Signal sources (click and navigation observers, network instrumentation,
//! visibility and keyboard listeners) publish [`Signal`]s into a
//! [`HookRegistry`]. Consumers register for the signal kinds they care about
//! and get a [`HookHandle`] back to detach later. How a source observes its
//! host is its own business; the registry only fans signals out.
//!
//! # Example
//!
//! ```rust,ignore
//! use rewind_core::hooks::{HookRegistry, LoggingHook, SignalKind};
//!
//! let registry = HookRegistry::new();
//! let handle = registry.register(SignalKind::ALL, Arc::new(LoggingHook));
//!
//! registry.dispatch(&Signal::Focus);
//! registry.unregister(handle);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::{Breadcrumb, PerformanceSpan};

/// Page visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityState {
    Visible,
    Hidden,
}

/// A key press observed on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    /// Key name (`a`, `Enter`, `Escape`)
    pub key: String,
    /// The target is a text input
    #[serde(default)]
    pub is_input_target: bool,
    /// Meta, shift, alt or ctrl was held
    #[serde(default)]
    pub has_modifier: bool,
    /// Description of the target element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl KeyPress {
    /// Typing into inputs and plain character keys are not recorded
    pub fn is_recordable(&self) -> bool {
        if self.is_input_target || self.key.is_empty() {
            return false;
        }
        let is_character_key = self.key.chars().count() == 1;
        self.has_modifier || !is_character_key
    }
}

/// Signals delivered by signal sources
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Breadcrumb such as a click or console message
    Breadcrumb(Breadcrumb),
    /// Completed span such as a navigation or network request
    Span(PerformanceSpan),
    /// Performance entries collected until the next flush
    Performance(Vec<PerformanceSpan>),
    /// Document visibility changed
    Visibility(VisibilityState),
    /// Window gained focus
    Focus,
    /// Window lost focus
    Blur,
    /// Key pressed
    KeyDown(KeyPress),
}

/// Capability a hook subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Breadcrumb,
    Span,
    Performance,
    Visibility,
    Focus,
    Blur,
    KeyDown,
}

impl SignalKind {
    /// Every kind
    pub const ALL: &'static [SignalKind] = &[
        SignalKind::Breadcrumb,
        SignalKind::Span,
        SignalKind::Performance,
        SignalKind::Visibility,
        SignalKind::Focus,
        SignalKind::Blur,
        SignalKind::KeyDown,
    ];
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Breadcrumb(_) => SignalKind::Breadcrumb,
            Signal::Span(_) => SignalKind::Span,
            Signal::Performance(_) => SignalKind::Performance,
            Signal::Visibility(_) => SignalKind::Visibility,
            Signal::Focus => SignalKind::Focus,
            Signal::Blur => SignalKind::Blur,
            Signal::KeyDown(_) => SignalKind::KeyDown,
        }
    }
}

/// Receives signals
pub trait SignalHook: Send + Sync {
    fn on_signal(&self, signal: &Signal);

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Registration token returned by [`HookRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

struct Registration {
    handle: HookHandle,
    kinds: Vec<SignalKind>,
    hook: Arc<dyn SignalHook>,
}

/// Registry fanning signals out to hooks
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl HookRegistry {
    /// Create a new hook registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for the given kinds
    pub fn register(&self, kinds: &[SignalKind], hook: Arc<dyn SignalHook>) -> HookHandle {
        let handle = HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(hook = hook.name(), kinds = ?kinds, "Registered signal hook");
        self.hooks.write().push(Registration {
            handle,
            kinds: kinds.to_vec(),
            hook,
        });
        handle
    }

    /// Remove a hook; returns whether it was registered
    pub fn unregister(&self, handle: HookHandle) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|r| r.handle != handle);
        before != hooks.len()
    }

    /// Deliver a signal to every hook subscribed to its kind.
    ///
    /// Hooks are called outside the registry lock, so they may register or
    /// unregister hooks themselves. Returns the number of hooks reached.
    pub fn dispatch(&self, signal: &Signal) -> usize {
        let kind = signal.kind();
        let targets: Vec<Arc<dyn SignalHook>> = self
            .hooks
            .read()
            .iter()
            .filter(|r| r.kinds.contains(&kind))
            .map(|r| r.hook.clone())
            .collect();

        for hook in &targets {
            hook.on_signal(signal);
        }
        targets.len()
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Example hook: Logging hook
pub struct LoggingHook;

impl SignalHook for LoggingHook {
    fn on_signal(&self, signal: &Signal) {
        match signal {
            Signal::Breadcrumb(crumb) => {
                tracing::debug!(category = %crumb.category, "Breadcrumb signal")
            }
            Signal::Span(span) => tracing::debug!(op = %span.op, "Span signal"),
            other => tracing::debug!(kind = ?other.kind(), "Signal"),
        }
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl SignalHook for Counter {
        fn on_signal(&self, _signal: &Signal) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_respects_capabilities() {
        let registry = HookRegistry::new();
        let focus_only = Arc::new(Counter::default());
        let everything = Arc::new(Counter::default());

        registry.register(&[SignalKind::Focus], focus_only.clone());
        registry.register(SignalKind::ALL, everything.clone());

        assert_eq!(registry.dispatch(&Signal::Focus), 2);
        assert_eq!(registry.dispatch(&Signal::Blur), 1);
        assert_eq!(focus_only.0.load(Ordering::SeqCst), 1);
        assert_eq!(everything.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_detaches() {
        let registry = HookRegistry::new();
        let counter = Arc::new(Counter::default());
        let handle = registry.register(SignalKind::ALL, counter.clone());

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
        assert_eq!(registry.dispatch(&Signal::Focus), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn keyboard_breadcrumb_rules() {
        let press = |key: &str, input: bool, modifier: bool| KeyPress {
            key: key.into(),
            is_input_target: input,
            has_modifier: modifier,
            target: None,
        };
        assert!(!press("a", false, false).is_recordable());
        assert!(press("a", false, true).is_recordable());
        assert!(press("Escape", false, false).is_recordable());
        assert!(!press("Escape", true, true).is_recordable());
    }
}
