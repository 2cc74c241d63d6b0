//! Data models shared by the ingestion feed, the console, and the CLI.
//!
//! Wire formats follow the launcher backend: log events carry
//! `source`/`level`/`text`/`timestamp`/`project_id`, and status snapshots
//! key services by `"<project_id>:<service_id>"`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Literal source name used for lines synthesized by the launcher itself.
pub const SYSTEM_SOURCE: &str = "system";

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_ERROR: &str = "\x1b[38;5;196m";
const ANSI_SYSTEM: &str = "\x1b[38;5;214m";
const ANSI_SERVICE: &str = "\x1b[38;5;75m";

// ──────────────────────────────────────────────────────────────────────
// Identifiers
// ──────────────────────────────────────────────────────────────────────

/// Opaque project identifier; the partition key for log retention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Service identifier, unique within its project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Composite key identifying one service of one project.
///
/// On the wire this is `"<project_id>:<service_id>"`, split at the first
/// colon so service ids may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey {
    pub project_id: ProjectId,
    pub service_id: ServiceId,
}

impl ServiceKey {
    #[must_use]
    pub fn new(project_id: impl Into<ProjectId>, service_id: impl Into<ServiceId>) -> Self {
        Self {
            project_id: project_id.into(),
            service_id: service_id.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let Some((project, service)) = raw.split_once(':') else {
            return Err(Error::InvalidServiceKey(raw.to_string()));
        };
        if project.is_empty() || service.is_empty() {
            return Err(Error::InvalidServiceKey(raw.to_string()));
        }
        Ok(Self::new(project, service))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.service_id)
    }
}

impl FromStr for ServiceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ServiceKey> for String {
    fn from(key: ServiceKey) -> Self {
        key.to_string()
    }
}

// ──────────────────────────────────────────────────────────────────────
// Log events
// ──────────────────────────────────────────────────────────────────────

/// Origin of a log line: the launcher itself or one of the project's
/// declared services (lower-cased service name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogSource {
    System,
    Service(String),
}

impl LogSource {
    /// Source for a declared service; names are matched case-insensitively.
    #[must_use]
    pub fn service(name: &str) -> Self {
        Self::from(name.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => SYSTEM_SOURCE,
            Self::Service(name) => name,
        }
    }
}

impl From<String> for LogSource {
    fn from(value: String) -> Self {
        let lowered = value.to_lowercase();
        if lowered == SYSTEM_SOURCE {
            Self::System
        } else {
            Self::Service(lowered)
        }
    }
}

impl From<LogSource> for String {
    fn from(source: LogSource) -> Self {
        match source {
            LogSource::System => SYSTEM_SOURCE.to_string(),
            LogSource::Service(name) => name,
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream a line came from: stdout is `Normal`, stderr is `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Normal,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// One immutable line of output belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub source: LogSource,
    pub level: LogLevel,
    /// Rendered line content without a trailing newline.
    pub text: String,
    /// Local wall-clock time, `HH:MM:SS.mmm`.
    pub timestamp: String,
    pub project_id: ProjectId,
}

impl LogEvent {
    /// Build an event stamped with the current local time.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        source: LogSource,
        level: LogLevel,
        text: impl Into<String>,
    ) -> Self {
        let mut text = text.into();
        let trimmed_len = text.trim_end_matches(['\r', '\n']).len();
        text.truncate(trimmed_len);
        Self {
            source,
            level,
            text,
            timestamp: local_timestamp(),
            project_id,
        }
    }

    /// A line captured from a service's stdout/stderr, prefixed with the
    /// colored `[NAME]` / `[NAME ERROR]` label.
    #[must_use]
    pub fn from_service(
        project_id: ProjectId,
        service_name: &str,
        level: LogLevel,
        line: &str,
    ) -> Self {
        let text = format!("{}{line}", format_log_prefix(service_name, level.is_error()));
        Self::new(project_id, LogSource::service(service_name), level, text)
    }

    /// A line synthesized by the launcher (start/stop notices, failures).
    #[must_use]
    pub fn system(project_id: ProjectId, level: LogLevel, message: &str) -> Self {
        let text = format!("{}{message}", format_log_prefix(SYSTEM_SOURCE, level.is_error()));
        Self::new(project_id, LogSource::System, level, text)
    }
}

/// Colored bracketed label that precedes every rendered line.
#[must_use]
pub fn format_log_prefix(source: &str, is_error: bool) -> String {
    let color = if is_error {
        ANSI_ERROR
    } else if source.eq_ignore_ascii_case(SYSTEM_SOURCE) {
        ANSI_SYSTEM
    } else {
        ANSI_SERVICE
    };
    let label = if is_error {
        format!("[{} ERROR]", source.to_uppercase())
    } else {
        format!("[{}]", source.to_uppercase())
    };
    format!("{color}{label}{ANSI_RESET} ")
}

/// Current local time formatted the way log lines carry it.
#[must_use]
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

// ──────────────────────────────────────────────────────────────────────
// Service status
// ──────────────────────────────────────────────────────────────────────

/// Last known state of one service as reported by the process layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub url: Option<String>,
}

impl ServiceStatus {
    /// Conservative default for services with no recorded snapshot.
    pub const STOPPED: Self = Self {
        running: false,
        url: None,
    };
}

/// Complete picture of every known service at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub services: HashMap<ServiceKey, ServiceStatus>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn new(services: HashMap<ServiceKey, ServiceStatus>) -> Self {
        Self { services }
    }
}
