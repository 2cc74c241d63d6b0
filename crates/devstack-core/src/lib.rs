//! Core types and configuration for the devstack log console
//!
//! This crate provides:
//! - Configuration management (`Config`, environment parsing)
//! - Data models (`LogEvent`, `ServiceKey`, `StatusSnapshot`, etc.)
//! - Common error types

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod models;

// Re-export key types for convenience
pub use config::Config;
pub use error::{Error as CoreError, Result as CoreResult};
pub use models::{
    LogEvent, LogLevel, LogSource, ProjectId, SYSTEM_SOURCE, ServiceId, ServiceKey,
    ServiceStatus, StatusSnapshot, format_log_prefix, local_timestamp,
};
