//! Runtime configuration for a vis and its analysis poller.
//!
//! Values come from defaults, optionally overridden by `MAPVIS_*` environment
//! variables. Unparseable overrides are ignored with a warning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_DEBOUNCE_MS: u64 = 10;

/// Retry policy of the analysis poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay before the first status check.
    pub start_delay_ms: u64,
    /// Upper bound for the delay between two checks.
    pub max_delay_ms: u64,
    /// Growth of the delay after each check.
    pub backoff_factor: f64,
    /// Checks per node before it is given up and marked failed.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { start_delay_ms: 1_000, max_delay_ms: 10_000, backoff_factor: 1.5, max_attempts: 60 }
    }
}

impl PollerConfig {
    pub fn start_delay(&self) -> Duration { Duration::from_millis(self.start_delay_ms) }

    pub fn max_delay(&self) -> Duration { Duration::from_millis(self.max_delay_ms.max(self.start_delay_ms)) }

    /// Delay after `delay`, grown by the backoff factor and capped.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 { self.backoff_factor } else { 1.0 };
        delay.mul_f64(factor).min(self.max_delay())
    }
}

/// Configuration accepted when loading a vis.
///
/// `api_key` and `auth_token` are forwarded to factories and to the map
/// definition; they never change how the orchestrator behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisConfig {
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub https: bool,
    /// Quiescence window for dataview mutations.
    pub debounce_ms: u64,
    pub poller: PollerConfig,
}

impl Default for VisConfig {
    fn default() -> Self {
        Self { api_key: None, auth_token: None, https: false, debounce_ms: DEFAULT_DEBOUNCE_MS, poller: PollerConfig::default() }
    }
}

impl VisConfig {
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self { Self::default().with_overrides(|key| std::env::var(key).ok()) }

    /// Apply `MAPVIS_*` overrides resolved through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAPVIS_API_KEY").filter(|s| !s.is_empty()) { self.api_key = Some(v); }
        if let Some(v) = lookup("MAPVIS_AUTH_TOKEN").filter(|s| !s.is_empty()) { self.auth_token = Some(v); }
        if let Some(v) = parsed::<bool>(&lookup, "MAPVIS_HTTPS") { self.https = v; }
        if let Some(v) = parsed::<u64>(&lookup, "MAPVIS_DEBOUNCE_MS") { self.debounce_ms = v; }
        if let Some(v) = parsed::<u64>(&lookup, "MAPVIS_POLL_START_MS") { self.poller.start_delay_ms = v; }
        if let Some(v) = parsed::<u64>(&lookup, "MAPVIS_POLL_MAX_MS") { self.poller.max_delay_ms = v; }
        if let Some(v) = parsed::<u32>(&lookup, "MAPVIS_POLL_MAX_ATTEMPTS") { self.poller.max_attempts = v; }
        self
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparseable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_replace_defaults() {
        let env: HashMap<&str, &str> = [
            ("MAPVIS_API_KEY", "k1"),
            ("MAPVIS_HTTPS", "true"),
            ("MAPVIS_DEBOUNCE_MS", "25"),
            ("MAPVIS_POLL_MAX_ATTEMPTS", "3"),
        ]
        .into_iter()
        .collect();
        let cfg = VisConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.api_key.as_deref(), Some("k1"));
        assert!(cfg.https);
        assert_eq!(cfg.debounce_ms, 25);
        assert_eq!(cfg.poller.max_attempts, 3);
        assert_eq!(cfg.poller.start_delay_ms, 1_000);
    }

    #[test]
    fn bad_overrides_fall_back() {
        let cfg = VisConfig::default().with_overrides(|k| (k == "MAPVIS_DEBOUNCE_MS").then(|| "soon".to_string()));
        assert_eq!(cfg.debounce_ms, DEFAULT_DEBOUNCE_MS);
    }

    #[test]
    fn poller_delay_grows_until_capped() {
        let p = PollerConfig { start_delay_ms: 1_000, max_delay_ms: 2_000, backoff_factor: 1.5, max_attempts: 5 };
        let d1 = p.next_delay(p.start_delay());
        assert_eq!(d1, Duration::from_millis(1_500));
        let d2 = p.next_delay(d1);
        assert_eq!(d2, Duration::from_millis(2_000));
        assert_eq!(p.next_delay(d2), Duration::from_millis(2_000));
    }
}
