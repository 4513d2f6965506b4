//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default number of rows fetched per pull request.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default capacity of the diagnostic event log.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 200;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether sync runs at all. A disabled engine never leaves `Disabled`.
    pub enabled: bool,
    /// Device ID sent with every pushed record.
    pub device_id: Uuid,
    /// Maximum rows per pull request.
    pub pull_page_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Number of diagnostic events kept.
    pub event_log_capacity: usize,
}

impl SyncConfig {
    /// Creates an enabled configuration for the given device.
    pub fn new(device_id: Uuid) -> Self {
        Self {
            enabled: true,
            device_id,
            pull_page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }

    /// Creates a configuration for a build where sync is switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the pull page size. Zero is raised to one.
    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event log capacity.
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    /// Enables or disables sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Exponential backoff after retryable failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after `failures` consecutive failures.
    ///
    /// `min(base * 2^(failures - 1), max)`, saturating; zero failures means
    /// no delay.
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }
}

/// Where and how to reach the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project URL, without the `/rest/v1` suffix.
    pub base_url: String,
    /// Public API key sent as `apikey`.
    pub api_key: String,
    /// Per-request timeout.
    #[serde(default = "RemoteConfig::default_timeout")]
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Creates a remote configuration.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Self::default_timeout(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }
}
