//! # beacond
//!
//! The Beacon engine daemon: log aggregation, the dashboard cache, alerting
//! and notification delivery driven by one scheduler.
//!
//! This crate provides:
//!
//! - [`EngineConfig`] — TOML configuration with validated defaults
//! - [`Engine`] — Wires the services together and owns the background jobs
//! - [`EngineError`] — Errors surfaced by configuration and engine calls

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;

pub use config::{EngineConfig, SAMPLE_CONFIG};
pub use engine::{
    AGGREGATION_JOB, Collaborators, CycleReport, DAILY_ROLLUP_JOB, Engine, HEALTH_CHECK_JOB,
};
pub use error::{EngineError, Result};
