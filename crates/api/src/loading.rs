use mapvis_core::LoadingToken;
use rustc_hash::FxHashSet;

/// Set of in-flight operations; the vis is loading while it is non-empty.
#[derive(Debug, Default)]
pub struct LoadingTracker {
    objects: FxHashSet<LoadingToken>,
}

impl LoadingTracker {
    pub fn new() -> Self { Self::default() }

    /// Returns true if the aggregate flag flipped to loading.
    pub fn track(&mut self, token: LoadingToken) -> bool {
        let was_empty = self.objects.is_empty();
        self.objects.insert(token);
        was_empty
    }

    /// Returns true if the aggregate flag flipped to not loading.
    pub fn untrack(&mut self, token: LoadingToken) -> bool {
        self.objects.remove(&token) && self.objects.is_empty()
    }

    pub fn is_loading(&self) -> bool { !self.objects.is_empty() }

    pub fn contains(&self, token: LoadingToken) -> bool { self.objects.contains(&token) }

    pub fn len(&self) -> usize { self.objects.len() }

    pub fn is_empty(&self) -> bool { self.objects.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_follows_membership() {
        let (a, b) = (LoadingToken::new(), LoadingToken::new());
        let mut t = LoadingTracker::new();
        assert!(t.track(a));
        assert!(!t.track(b));
        assert!(!t.track(a), "tracking twice is a no-op");
        assert!(!t.untrack(a));
        assert!(t.is_loading());
        assert!(t.untrack(b));
        assert!(!t.is_loading());
    }

    #[test]
    fn untracking_unknown_token_changes_nothing() {
        let mut t = LoadingTracker::new();
        assert!(!t.untrack(LoadingToken::new()));
        assert!(!t.is_loading());
        let a = LoadingToken::new();
        t.track(a);
        assert!(!t.untrack(LoadingToken::new()));
        assert!(t.is_loading());
        assert_eq!(t.len(), 1);
    }
}
