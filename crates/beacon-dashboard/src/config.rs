//! Dashboard and cache configuration.

use std::time::Duration;

/// Configuration for dashboard computations.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Window over which service health is judged.
    pub health_window: Duration,
    /// Window used for cached global and per-service statistics.
    pub stats_window: Duration,
    /// Window used for cached top errors.
    pub top_errors_window: Duration,
    /// Number of entries kept in cached top errors.
    pub top_errors_limit: usize,
    /// Errors per minute above which a service without an alert config is `Error`.
    pub default_error_threshold_per_min: f64,
    /// Warnings per minute above which a service without an alert config is `Warning`.
    pub default_warning_threshold_per_min: f64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            health_window: Duration::from_secs(60 * 60),
            stats_window: Duration::from_secs(60 * 60),
            top_errors_window: Duration::from_secs(60 * 60),
            top_errors_limit: 10,
            // 50 per hour
            default_error_threshold_per_min: 50.0 / 60.0,
            default_warning_threshold_per_min: 50.0 / 60.0,
        }
    }
}

impl DashboardConfig {
    /// Set the health window.
    #[must_use]
    pub const fn with_health_window(mut self, window: Duration) -> Self {
        self.health_window = window;
        self
    }

    /// Set the statistics window.
    #[must_use]
    pub const fn with_stats_window(mut self, window: Duration) -> Self {
        self.stats_window = window;
        self
    }

    /// Set the top errors window and limit.
    #[must_use]
    pub const fn with_top_errors(mut self, window: Duration, limit: usize) -> Self {
        self.top_errors_window = window;
        self.top_errors_limit = limit;
        self
    }

    /// Set the default per-minute thresholds.
    #[must_use]
    pub const fn with_default_thresholds(
        mut self,
        error_per_min: f64,
        warning_per_min: f64,
    ) -> Self {
        self.default_error_threshold_per_min = error_per_min;
        self.default_warning_threshold_per_min = warning_per_min;
        self
    }
}

/// Configuration for the stats cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime of an entry set without an explicit TTL.
    pub default_ttl: Duration,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the given default TTL.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            ..Self::default()
        }
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
