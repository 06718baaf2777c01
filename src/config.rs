//! Database configuration.
//!
//! Follows the layered pattern used across the crate's configs: coded
//! defaults, environment overrides via `from_env`, and `with_*` builders for
//! explicit construction in tests and embedders.

use std::time::Duration;

use crate::gc::ReaperConfig;

/// Environment variable for the connection lock timeout in milliseconds.
pub const LOCK_TIMEOUT_MS_ENV: &str = "ROWSTASH_LOCK_TIMEOUT_MS";

/// Default bound on waiting for the connection lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunable knobs for one database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Bound on waiting for the connection lock before the operation fails
    /// with a lock-timeout error.
    pub lock_timeout: Duration,

    /// Background reaper settings.
    pub reaper: ReaperConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            reaper: ReaperConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `ROWSTASH_LOCK_TIMEOUT_MS` | Connection lock wait bound | 5000 |
    /// | `ROWSTASH_REAP_INTERVAL_SECS` | Reaper sweep period | 60 |
    /// | `ROWSTASH_REAPER_ENABLED` | Whether the reaper runs | true |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var(LOCK_TIMEOUT_MS_ENV)
            && let Ok(ms) = v.parse::<u64>()
        {
            config.lock_timeout = Duration::from_millis(ms);
        }
        config.reaper = ReaperConfig::from_env();
        config
    }

    /// Sets the connection lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the reaper sweep period.
    #[must_use]
    pub const fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reaper.interval = interval;
        self
    }

    /// Disables the background reaper.
    ///
    /// Useful for deterministic single-threaded tests: nothing is evicted
    /// behind the caller's back.
    #[must_use]
    pub const fn without_reaper(mut self) -> Self {
        self.reaper.enabled = false;
        self
    }
}
