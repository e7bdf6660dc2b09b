//! Reload coalescing: layer changes reload at once, dataview changes are
//! debounced into a single reload plus a single size invalidation.

use std::time::Duration;

use mapvis_core::LayerId;
use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::debug;

/// Keyed, cancellable deadlines. Scheduling a key again pushes its deadline
/// back; due keys come out in the order they were first scheduled.
#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    pending: SmallVec<[(K, Instant); 2]>,
}

impl<K: PartialEq + Clone> Debouncer<K> {
    pub fn new(window: Duration) -> Self { Self { window, pending: SmallVec::new() } }

    pub fn window(&self) -> Duration { self.window }

    /// Returns the new deadline of `key`.
    pub fn schedule(&mut self, key: K, now: Instant) -> Instant {
        let deadline = now + self.window;
        match self.pending.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = deadline,
            None => self.pending.push((key, deadline)),
        }
        deadline
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(k, _)| *k != *key);
        before != self.pending.len()
    }

    pub fn cancel_all(&mut self) { self.pending.clear(); }

    pub fn is_scheduled(&self, key: &K) -> bool { self.pending.iter().any(|(k, _)| k == key) }

    pub fn next_deadline(&self) -> Option<Instant> { self.pending.iter().map(|(_, d)| *d).min() }

    pub fn take_due(&mut self, now: Instant) -> SmallVec<[K; 2]> {
        let mut due = SmallVec::new();
        self.pending.retain(|(k, d)| {
            if *d <= now {
                due.push(k.clone());
                false
            } else {
                true
            }
        });
        due
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    DataviewReload,
    InvalidateSize,
}

/// Layer collection change, reduced to what reload scoping needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerChange {
    Added(LayerId),
    Removed(LayerId),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    Reload { source_id: Option<LayerId> },
    InvalidateSize,
}

#[derive(Debug)]
pub struct ReloadCoordinator {
    debouncer: Debouncer<Deferred>,
}

impl ReloadCoordinator {
    pub fn new(window: Duration) -> Self { Self { debouncer: Debouncer::new(window) } }

    pub fn on_layer_change(&self, change: LayerChange) -> CoordinatorAction {
        let source_id = match change {
            LayerChange::Added(id) | LayerChange::Removed(id) => Some(id),
            LayerChange::Reset => None,
        };
        CoordinatorAction::Reload { source_id }
    }

    pub fn on_dataviews_change(&mut self, now: Instant) {
        let deadline = self.debouncer.schedule(Deferred::DataviewReload, now);
        self.debouncer.schedule(Deferred::InvalidateSize, now);
        debug!(in_ms = %deadline.saturating_duration_since(now).as_millis(), "vis: dataview reload scheduled");
    }

    pub fn next_deadline(&self) -> Option<Instant> { self.debouncer.next_deadline() }

    pub fn take_due(&mut self, now: Instant) -> SmallVec<[CoordinatorAction; 2]> {
        self.debouncer
            .take_due(now)
            .into_iter()
            .map(|d| match d {
                Deferred::DataviewReload => CoordinatorAction::Reload { source_id: None },
                Deferred::InvalidateSize => CoordinatorAction::InvalidateSize,
            })
            .collect()
    }

    pub fn cancel_all(&mut self) { self.debouncer.cancel_all(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    #[test]
    fn burst_collapses_into_one_deadline() {
        let t0 = Instant::now();
        let mut d: Debouncer<&str> = Debouncer::new(ms(10));
        for i in 0..5 {
            d.schedule("reload", t0 + ms(i));
        }
        assert_eq!(d.next_deadline(), Some(t0 + ms(14)));
        assert!(d.take_due(t0 + ms(13)).is_empty());
        assert_eq!(d.take_due(t0 + ms(14)).as_slice(), &["reload"]);
        assert!(d.take_due(t0 + ms(100)).is_empty());
        assert_eq!(d.next_deadline(), None);
    }

    #[test]
    fn cancel_removes_key() {
        let t0 = Instant::now();
        let mut d: Debouncer<u8> = Debouncer::new(ms(5));
        d.schedule(1, t0);
        d.schedule(2, t0);
        assert!(d.cancel(&1));
        assert!(!d.cancel(&1));
        assert_eq!(d.take_due(t0 + ms(5)).as_slice(), &[2]);
    }

    #[test]
    fn dataview_changes_yield_reload_and_invalidate() {
        let t0 = Instant::now();
        let mut c = ReloadCoordinator::new(ms(10));
        c.on_dataviews_change(t0);
        c.on_dataviews_change(t0 + ms(3));
        let due = c.take_due(t0 + ms(13));
        assert_eq!(due.as_slice(), &[CoordinatorAction::Reload { source_id: None }, CoordinatorAction::InvalidateSize]);
        assert!(c.next_deadline().is_none());
    }

    #[test]
    fn layer_changes_are_scoped() {
        let c = ReloadCoordinator::new(ms(10));
        assert_eq!(c.on_layer_change(LayerChange::Added("l1".into())), CoordinatorAction::Reload { source_id: Some("l1".into()) });
        assert_eq!(c.on_layer_change(LayerChange::Reset), CoordinatorAction::Reload { source_id: None });
    }
}
