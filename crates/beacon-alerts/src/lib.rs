//! # beacon-alerts
//!
//! Per-service threshold alerting for Beacon.
//!
//! This crate provides:
//!
//! - [`AlertConfig`] — Operator-owned per-minute thresholds and notification targets
//! - [`AlertService`] — Evaluates rollups and records deduplicated [`AlertViolation`]s
//! - [`NotificationDispatcher`] — Routes a violation to its email and webhook channels
//! - [`RetryPolicy`] — Cancellable exponential backoff for delivery attempts
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use beacon_alerts::{
//!     AlertConfig, AlertService, InMemoryAlertConfigStore, InMemoryViolationStore,
//! };
//! use beacon_logs::{AggregatedStat, Granularity, LogLevel};
//! use chrono::Utc;
//!
//! let configs = InMemoryAlertConfigStore::with_configs([AlertConfig::new("checkout", 4, 50)])
//!     .unwrap();
//! let service = AlertService::new(Arc::new(configs), Arc::new(InMemoryViolationStore::new()));
//!
//! let stats = vec![AggregatedStat {
//!     bucket_start: Granularity::Minute.truncate(Utc::now()),
//!     granularity: Granularity::Minute,
//!     service: "checkout".to_string(),
//!     level: LogLevel::Error,
//!     count: 5,
//! }];
//! let violations = service.check_thresholds(&stats).unwrap();
//! assert_eq!(violations.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use channels::{
    ChannelNotifier, EmailMessage, EmailNotifier, HttpWebhookTransport, MailTransport, Notify,
    SmtpMailTransport, SmtpSecurity, SmtpSettings, WebhookNotifier, WebhookTransport,
    parse_address, parse_webhook_url,
};
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use error::{AlertError, NotifyError, Result};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use service::{AlertService, NotificationReport};
pub use store::{
    AlertConfigSource, InMemoryAlertConfigStore, InMemoryViolationStore, ViolationStore,
    ViolationStoreConfig,
};
pub use types::{
    AlertConfig, AlertViolation, CycleKey, ViolationId, ViolationLevel, ViolationPayload,
};
