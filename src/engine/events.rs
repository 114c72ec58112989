//! Lifecycle listeners wrapped around every action.
//!
//! Listeners are registered at three scopes (global, module, call) and
//! aggregated in that order, see [`EventListeners::aggregate`].

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::error::MagnetarError;
use crate::engine::plugin::{ActionName, ActionPayload, ModuleData};

pub type BeforeFn = Arc<dyn Fn(&BeforeEvent<'_>) + Send + Sync + 'static>;
pub type SuccessFn = Arc<dyn Fn(&SuccessEvent<'_>) + Send + Sync + 'static>;
pub type ErrorFn = Arc<dyn Fn(&ErrorEvent<'_>) + Send + Sync + 'static>;
pub type RevertFn = Arc<dyn Fn(&RevertEvent<'_>) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    Before,
    Success,
    Error,
    Revert,
}

/// Set by a `before` listener to cancel an action before any store runs.
#[derive(Debug, Default)]
pub struct AbortSignal {
    aborted: AtomicBool,
}

impl AbortSignal {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

pub struct BeforeEvent<'a> {
    pub payload: &'a ActionPayload,
    pub action_name: ActionName,
    pub store_name: &'a str,
    signal: &'a AbortSignal,
}

impl<'a> BeforeEvent<'a> {
    pub(crate) fn new(
        payload: &'a ActionPayload,
        action_name: ActionName,
        store_name: &'a str,
        signal: &'a AbortSignal,
    ) -> Self {
        Self {
            payload,
            action_name,
            store_name,
            signal,
        }
    }

    /// Cancels the action. No store runs and no `success`/`error` event fires.
    pub fn abort(&self) {
        self.signal.abort();
    }
}

pub struct SuccessEvent<'a> {
    pub payload: &'a ActionPayload,
    pub action_name: ActionName,
    pub store_name: &'a str,
    pub result: Option<&'a ModuleData>,
}

pub struct ErrorEvent<'a> {
    pub payload: &'a ActionPayload,
    pub action_name: ActionName,
    pub store_name: &'a str,
    pub error: &'a MagnetarError,
}

pub struct RevertEvent<'a> {
    pub payload: &'a ActionPayload,
    pub action_name: ActionName,
    pub store_name: &'a str,
    /// Local module data after the rollback.
    pub result: Option<&'a ModuleData>,
}

#[derive(Clone, Default)]
pub struct EventListeners {
    before: Vec<BeforeFn>,
    success: Vec<SuccessFn>,
    error: Vec<ErrorFn>,
    revert: Vec<RevertFn>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before<F>(mut self, listener: F) -> Self
    where
        F: Fn(&BeforeEvent<'_>) + Send + Sync + 'static,
    {
        self.before.push(Arc::new(listener));
        self
    }

    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&SuccessEvent<'_>) + Send + Sync + 'static,
    {
        self.success.push(Arc::new(listener));
        self
    }

    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ErrorEvent<'_>) + Send + Sync + 'static,
    {
        self.error.push(Arc::new(listener));
        self
    }

    pub fn on_revert<F>(mut self, listener: F) -> Self
    where
        F: Fn(&RevertEvent<'_>) + Send + Sync + 'static,
    {
        self.revert.push(Arc::new(listener));
        self
    }

    /// Concatenates listener lists, preserving the order of `scopes`.
    pub fn aggregate<'a, I>(scopes: I) -> Self
    where
        I: IntoIterator<Item = &'a EventListeners>,
    {
        scopes
            .into_iter()
            .fold(EventListeners::default(), |mut merged, scope| {
                merged.before.extend(scope.before.iter().cloned());
                merged.success.extend(scope.success.iter().cloned());
                merged.error.extend(scope.error.iter().cloned());
                merged.revert.extend(scope.revert.iter().cloned());
                merged
            })
    }

    pub fn len(&self, event: EventName) -> usize {
        match event {
            EventName::Before => self.before.len(),
            EventName::Success => self.success.len(),
            EventName::Error => self.error.len(),
            EventName::Revert => self.revert.len(),
        }
    }

    /// Stops at the first listener that aborts.
    pub(crate) fn emit_before(&self, event: &BeforeEvent<'_>) {
        for listener in &self.before {
            listener(event);
            if event.signal.is_aborted() {
                break;
            }
        }
    }

    pub(crate) fn emit_success(&self, event: &SuccessEvent<'_>) {
        for listener in &self.success {
            listener(event);
        }
    }

    pub(crate) fn emit_error(&self, event: &ErrorEvent<'_>) {
        for listener in &self.error {
            listener(event);
        }
    }

    pub(crate) fn emit_revert(&self, event: &RevertEvent<'_>) {
        for listener in &self.revert {
            listener(event);
        }
    }
}

impl Debug for EventListeners {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("before", &self.before.len())
            .field("success", &self.success.len())
            .field("error", &self.error.len())
            .field("revert", &self.revert.len())
            .finish()
    }
}
