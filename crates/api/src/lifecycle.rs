//! Tri-state lifecycle with one-shot first-outcome callbacks.

use mapvis_core::{InstantiationError, LifecycleState};
use tracing::debug;

pub type SuccessCallback = Box<dyn FnOnce() + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&InstantiationError) + Send>;

/// Lifecycle of a vis. The ready and error callbacks belong to the first
/// outcome only: leaving `Uninitialized` consumes both, whichever fired.
#[derive(Default)]
pub struct Lifecycle {
    state: LifecycleState,
    error: Option<InstantiationError>,
    on_ready: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl Lifecycle {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> LifecycleState { self.state }

    pub fn error(&self) -> Option<&InstantiationError> { self.error.as_ref() }

    pub fn register_on_ready(&mut self, callback: SuccessCallback) {
        if self.state != LifecycleState::Uninitialized {
            debug!(state = %self.state, "vis: ready callback registered after first outcome; dropped");
            return;
        }
        self.on_ready = Some(callback);
    }

    pub fn register_on_error(&mut self, callback: ErrorCallback) {
        if self.state != LifecycleState::Uninitialized {
            debug!(state = %self.state, "vis: error callback registered after first outcome; dropped");
            return;
        }
        self.on_error = Some(callback);
    }

    /// Returns true if the state changed.
    pub fn mark_consistent(&mut self) -> bool {
        if self.state == LifecycleState::Uninitialized {
            self.on_error = None;
            if let Some(cb) = self.on_ready.take() {
                cb();
            }
        }
        self.error = None;
        let changed = self.state != LifecycleState::Consistent;
        self.state = LifecycleState::Consistent;
        changed
    }

    /// Returns true if the state changed.
    pub fn mark_failed(&mut self, error: InstantiationError) -> bool {
        if self.state == LifecycleState::Uninitialized {
            self.on_ready = None;
            if let Some(cb) = self.on_error.take() {
                cb(&error);
            }
        }
        self.error = Some(error);
        let changed = self.state != LifecycleState::Failed;
        self.state = LifecycleState::Failed;
        changed
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state)
            .field("error", &self.error)
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Lifecycle) {
        let ready = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut lc = Lifecycle::new();
        let r = Arc::clone(&ready);
        lc.register_on_ready(Box::new(move || { r.fetch_add(1, Ordering::SeqCst); }));
        let f = Arc::clone(&failed);
        lc.register_on_error(Box::new(move |_| { f.fetch_add(1, Ordering::SeqCst); }));
        (ready, failed, lc)
    }

    #[test]
    fn only_first_outcome_fires() {
        let (ready, failed, mut lc) = counters();
        assert!(lc.mark_consistent());
        assert!(lc.mark_failed(InstantiationError::rejected("x")));
        assert!(lc.mark_consistent());
        assert!(!lc.mark_consistent());
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
        assert!(lc.error().is_none());
    }

    #[test]
    fn failure_first_consumes_ready_callback() {
        let (ready, failed, mut lc) = counters();
        lc.mark_failed(InstantiationError::Transport("down".into()));
        lc.mark_failed(InstantiationError::Transport("still down".into()));
        lc.mark_consistent();
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(lc.state(), LifecycleState::Consistent);
    }

    #[test]
    fn re_registering_replaces() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut lc = Lifecycle::new();
        let a = Arc::clone(&first);
        lc.register_on_ready(Box::new(move || { a.fetch_add(1, Ordering::SeqCst); }));
        let b = Arc::clone(&second);
        lc.register_on_ready(Box::new(move || { b.fetch_add(1, Ordering::SeqCst); }));
        lc.mark_consistent();
        assert_eq!((first.load(Ordering::SeqCst), second.load(Ordering::SeqCst)), (0, 1));
    }
}
