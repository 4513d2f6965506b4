//! Injected sync policy.
//!
//! Production builds run with [`NoopPolicy`]. Tests and debug builds use
//! [`DebugPolicy`] to decline cycles, inject failures or stretch a cycle.

use parking_lot::Mutex;
use std::time::Duration;

/// Hooks consulted by the engine around every cycle.
pub trait SyncPolicy: Send + Sync {
    /// Whether a trigger may start a cycle at all.
    fn should_sync(&self) -> bool {
        true
    }

    /// A failure to report instead of running the cycle.
    fn force_failure(&self) -> Option<String> {
        None
    }

    /// Extra time a cycle should take before doing any work.
    fn force_duration(&self) -> Option<Duration> {
        None
    }
}

/// Policy that never interferes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPolicy;

impl SyncPolicy for NoopPolicy {}

#[derive(Debug, Default)]
struct DebugSettings {
    decline: bool,
    failure: Option<String>,
    duration: Option<Duration>,
}

/// Policy with runtime-adjustable overrides.
#[derive(Debug, Default)]
pub struct DebugPolicy {
    settings: Mutex<DebugSettings>,
}

impl DebugPolicy {
    /// Creates a policy with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every trigger decline (or stop declining).
    pub fn set_declined(&self, decline: bool) {
        self.settings.lock().decline = decline;
    }

    /// Makes every cycle fail with `message` until cleared with `None`.
    pub fn set_forced_failure(&self, message: Option<String>) {
        self.settings.lock().failure = message;
    }

    /// Makes every cycle wait `duration` before doing any work.
    pub fn set_forced_duration(&self, duration: Option<Duration>) {
        self.settings.lock().duration = duration;
    }
}

impl SyncPolicy for DebugPolicy {
    fn should_sync(&self) -> bool {
        !self.settings.lock().decline
    }

    fn force_failure(&self) -> Option<String> {
        self.settings.lock().failure.clone()
    }

    fn force_duration(&self) -> Option<Duration> {
        self.settings.lock().duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_allows_everything() {
        let policy = NoopPolicy;
        assert!(policy.should_sync());
        assert!(policy.force_failure().is_none());
        assert!(policy.force_duration().is_none());
    }

    #[test]
    fn debug_overrides() {
        let policy = DebugPolicy::new();
        policy.set_declined(true);
        policy.set_forced_failure(Some("simulated outage".into()));
        policy.set_forced_duration(Some(Duration::from_millis(50)));

        assert!(!policy.should_sync());
        assert_eq!(policy.force_failure().as_deref(), Some("simulated outage"));
        assert_eq!(policy.force_duration(), Some(Duration::from_millis(50)));

        policy.set_forced_failure(None);
        assert!(policy.force_failure().is_none());
    }
}
