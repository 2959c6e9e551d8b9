//! Storage for alert configuration and recorded violations.
//!
//! This module provides:
//! - [`AlertConfigSource`] — Read access to operator-owned [`AlertConfig`]s
//! - [`ViolationStore`] — Persistence for [`AlertViolation`]s with cycle deduplication
//! - In-memory implementations of both

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{AlertError, Result};
use crate::types::{AlertConfig, AlertViolation, CycleKey, ViolationId};

/// Source of alert configuration.
pub trait AlertConfigSource: Send + Sync {
    /// Configuration for a single service.
    fn get(&self, service: &str) -> Result<Option<AlertConfig>>;

    /// Every enabled configuration.
    fn list_enabled(&self) -> Result<Vec<AlertConfig>>;
}

/// Thread-safe in-memory alert configuration store.
#[derive(Debug, Default)]
pub struct InMemoryAlertConfigStore {
    configs: RwLock<HashMap<String, AlertConfig>>,
}

impl InMemoryAlertConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given configs.
    pub fn with_configs(configs: impl IntoIterator<Item = AlertConfig>) -> Result<Self> {
        let store = Self::new();
        for config in configs {
            store.upsert(config)?;
        }
        Ok(store)
    }

    /// Inserts or replaces the config for its service.
    pub fn upsert(&self, mut config: AlertConfig) -> Result<()> {
        config.validate()?;
        let mut configs = self.configs.write();
        if let Some(existing) = configs.get(&config.service) {
            config.created_at = existing.created_at;
            config.updated_at = Utc::now().max(config.created_at);
        }
        info!(
            service = %config.service,
            enabled = config.enabled,
            error_threshold = config.error_threshold_per_min,
            warning_threshold = config.warning_threshold_per_min,
            "stored alert config"
        );
        configs.insert(config.service.clone(), config);
        Ok(())
    }

    /// Enables or disables the config for a service.
    pub fn set_enabled(&self, service: &str, enabled: bool) -> Result<()> {
        let mut configs = self.configs.write();
        let config = configs
            .get_mut(service)
            .ok_or_else(|| AlertError::ConfigNotFound {
                service: service.to_string(),
            })?;
        config.enabled = enabled;
        config.updated_at = Utc::now().max(config.created_at);
        Ok(())
    }

    /// Removes the config for a service.
    pub fn remove(&self, service: &str) -> Option<AlertConfig> {
        self.configs.write().remove(service)
    }

    /// Every stored config, sorted by service.
    pub fn list(&self) -> Vec<AlertConfig> {
        let mut configs: Vec<_> = self.configs.read().values().cloned().collect();
        configs.sort_by(|a, b| a.service.cmp(&b.service));
        configs
    }

    /// Returns the number of stored configs.
    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    /// Returns true if no configs are stored.
    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

impl AlertConfigSource for InMemoryAlertConfigStore {
    fn get(&self, service: &str) -> Result<Option<AlertConfig>> {
        Ok(self.configs.read().get(service).cloned())
    }

    fn list_enabled(&self) -> Result<Vec<AlertConfig>> {
        Ok(self
            .list()
            .into_iter()
            .filter(|c| c.enabled)
            .collect())
    }
}

/// Persistence for violations.
pub trait ViolationStore: Send + Sync {
    /// Records the violation unless one already exists for its cycle.
    ///
    /// Returns the stored violation when it was inserted, `None` when it was a duplicate.
    fn insert_if_absent(&self, violation: AlertViolation) -> Result<Option<AlertViolation>>;

    /// Violations whose notification has not been attempted, oldest first.
    fn pending(&self) -> Result<Vec<AlertViolation>>;

    /// Stamps the notification attempt on a violation.
    fn mark_notified(
        &self,
        id: ViolationId,
        notified_at: DateTime<Utc>,
        delivery_error: Option<String>,
    ) -> Result<()>;

    /// Most recent violations for a service, newest first.
    fn for_service(&self, service: &str, limit: usize) -> Result<Vec<AlertViolation>>;

    /// Most recent violations across services, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<AlertViolation>>;
}

/// Configuration for the in-memory violation store.
#[derive(Debug, Clone)]
pub struct ViolationStoreConfig {
    /// Maximum violations to keep; the oldest notified ones are dropped first.
    pub max_violations: usize,
}

impl Default for ViolationStoreConfig {
    fn default() -> Self {
        Self {
            max_violations: 10_000,
        }
    }
}

#[derive(Debug, Default)]
struct ViolationLog {
    violations: VecDeque<AlertViolation>,
    cycles: HashSet<CycleKey>,
}

/// Thread-safe in-memory violation store.
#[derive(Debug, Default)]
pub struct InMemoryViolationStore {
    config: ViolationStoreConfig,
    inner: RwLock<ViolationLog>,
}

impl InMemoryViolationStore {
    /// Creates an empty store with default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ViolationStoreConfig::default())
    }

    /// Creates an empty store with the given retention.
    #[must_use]
    pub fn with_config(config: ViolationStoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(ViolationLog::default()),
        }
    }

    /// Looks up a violation by ID.
    pub fn get(&self, id: ViolationId) -> Option<AlertViolation> {
        self.inner
            .read()
            .violations
            .iter()
            .find(|v| v.id == id)
            .cloned()
    }

    /// Returns the number of stored violations.
    pub fn len(&self) -> usize {
        self.inner.read().violations.len()
    }

    /// Returns true if no violations are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().violations.is_empty()
    }

    fn enforce_retention(&self, log: &mut ViolationLog) {
        while log.violations.len() > self.config.max_violations {
            let Some(position) = log.violations.iter().position(|v| !v.is_pending()) else {
                break;
            };
            if let Some(dropped) = log.violations.remove(position) {
                log.cycles.remove(&dropped.cycle_key());
            }
        }
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn insert_if_absent(&self, violation: AlertViolation) -> Result<Option<AlertViolation>> {
        let mut log = self.inner.write();
        if !log.cycles.insert(violation.cycle_key()) {
            debug!(
                service = %violation.service,
                level = %violation.level,
                window_start = %violation.window_start,
                "violation already recorded for cycle"
            );
            return Ok(None);
        }
        log.violations.push_back(violation.clone());
        self.enforce_retention(&mut log);
        Ok(Some(violation))
    }

    fn pending(&self) -> Result<Vec<AlertViolation>> {
        Ok(self
            .inner
            .read()
            .violations
            .iter()
            .filter(|v| v.is_pending())
            .cloned()
            .collect())
    }

    fn mark_notified(
        &self,
        id: ViolationId,
        notified_at: DateTime<Utc>,
        delivery_error: Option<String>,
    ) -> Result<()> {
        let mut log = self.inner.write();
        let violation = log
            .violations
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| AlertError::ViolationNotFound { id: id.to_string() })?;
        violation.notified_at = Some(notified_at);
        violation.delivery_error = delivery_error;
        Ok(())
    }

    fn for_service(&self, service: &str, limit: usize) -> Result<Vec<AlertViolation>> {
        Ok(self
            .inner
            .read()
            .violations
            .iter()
            .rev()
            .filter(|v| v.service == service)
            .take(limit)
            .cloned()
            .collect())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AlertViolation>> {
        Ok(self
            .inner
            .read()
            .violations
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
