//! # beacon-dashboard
//!
//! Read-side statistics and service health for Beacon.
//!
//! This crate provides:
//!
//! - [`DashboardService`] — Global and per-service statistics, top errors, service health
//! - [`StatsCache`] — Shared TTL cache with hit/miss counters and a background sweeper
//! - [`CachedDashboard`] — Read-through composition of the two, with a composite snapshot
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use beacon_alerts::InMemoryAlertConfigStore;
//! use beacon_dashboard::{CachedDashboard, DashboardConfig, DashboardService, StatsCache};
//! use beacon_logs::{InMemoryLogRepository, InMemoryStatStore, LogAggregationService};
//!
//! let aggregation = LogAggregationService::new(
//!     Arc::new(InMemoryLogRepository::new()),
//!     Arc::new(InMemoryStatStore::new()),
//! );
//! let service = DashboardService::new(
//!     aggregation,
//!     Arc::new(InMemoryAlertConfigStore::new()),
//!     DashboardConfig::default(),
//! );
//! let dashboard = CachedDashboard::new(service, StatsCache::new(Duration::from_secs(300)));
//!
//! let global = dashboard.global_stats(Duration::from_secs(3600)).unwrap();
//! assert_eq!(global.total, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cached;
pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use cache::{CacheStats, StatsCache, SweeperHandle};
pub use cached::{
    CachedDashboard, DASHBOARD_STATS_KEY, DashboardValue, HEALTH_KEY, SERVICE_STATS_PREFIX,
    TOP_ERRORS_KEY, global_stats_key, service_stats_key, top_errors_key,
};
pub use config::{CacheConfig, DashboardConfig};
pub use error::{DashboardError, DashboardResult};
pub use service::DashboardService;
pub use types::{
    DashboardSnapshot, ErrorSummary, GlobalStats, HealthStatus, ServiceHealth, ServiceStats,
    ServiceSummary,
};
