//! Garbage collection for the object cache.
//!
//! The background reaper sweeps the database on a fixed period. Each sweep
//! walks every live table handle:
//!
//! - a table nobody references outside the database's map is flushed and
//!   removed from the map;
//! - otherwise, each cached row entry with no external referrers is flushed
//!   (if dirty) and evicted from the entry cache.
//!
//! Reference counts stand in for "is anyone still holding this object
//! besides the cache itself": the cache owns one `Arc` per object, so a
//! strong count of exactly one means unreferenced. The invariant the reaper
//! upholds is that **eviction is always preceded by a flush of dirty state**
//! — a slot whose flush fails stays cached and is retried on the next sweep.
//!
//! The reaper is a plain named thread with a condvar-signalled shutdown so
//! `Database::close` can stop it synchronously. Disable it with
//! [`crate::DatabaseConfig::without_reaper`] for deterministic tests.

mod reaper;

pub(crate) use reaper::Reaper;

use std::time::Duration;

/// Environment variable for the sweep period in seconds.
pub const REAP_INTERVAL_SECS_ENV: &str = "ROWSTASH_REAP_INTERVAL_SECS";

/// Environment variable toggling the reaper.
pub const REAPER_ENABLED_ENV: &str = "ROWSTASH_REAPER_ENABLED";

/// Default sweep period.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Background reaper settings.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Period between sweeps.
    pub interval: Duration,
    /// Whether the reaper thread is started at all.
    pub enabled: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAP_INTERVAL,
            enabled: true,
        }
    }
}

impl ReaperConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var(REAP_INTERVAL_SECS_ENV)
            && let Ok(secs) = v.parse::<u64>()
        {
            config.interval = Duration::from_secs(secs.max(1));
        }
        if let Ok(v) = std::env::var(REAPER_ENABLED_ENV) {
            config.enabled = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        config
    }

    /// Sets the sweep period.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Enables or disables the reaper.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
