//! Visibility predicate shared by live ingestion and buffer replays.

use std::fmt;
use std::str::FromStr;

use devstack_core::{CoreError, LogEvent, LogLevel, LogSource, ProjectId, SYSTEM_SOURCE};
use serde::{Deserialize, Serialize};

const ALL: &str = "all";

/// Which sources are shown. Lines whose source matches no declared
/// service (and is not `system`) are only visible under [`Self::All`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceFilter {
    #[default]
    All,
    System,
    Service(String),
}

impl SourceFilter {
    /// Filter options offered for a project: all, system, then each
    /// declared service lower-cased.
    #[must_use]
    pub fn options<'a>(service_names: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        let mut options = vec![Self::All, Self::System];
        options.extend(
            service_names
                .into_iter()
                .map(|name| Self::Service(name.to_lowercase())),
        );
        options
    }

    #[must_use]
    pub fn matches(&self, source: &LogSource) -> bool {
        match (self, source) {
            (Self::All, _) | (Self::System, LogSource::System) => true,
            (Self::Service(wanted), LogSource::Service(name)) => wanted == name,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL,
            Self::System => SYSTEM_SOURCE,
            Self::Service(name) => name,
        }
    }
}

impl From<String> for SourceFilter {
    fn from(value: String) -> Self {
        let lowered = value.trim().to_lowercase();
        match lowered.as_str() {
            ALL => Self::All,
            SYSTEM_SOURCE => Self::System,
            _ => Self::Service(lowered),
        }
    }
}

impl From<&str> for SourceFilter {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<SourceFilter> for String {
    fn from(filter: SourceFilter) -> Self {
        filter.as_str().to_string()
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stream levels are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelFilter {
    #[default]
    All,
    Normal,
    Error,
}

impl LevelFilter {
    #[must_use]
    pub const fn matches(self, level: LogLevel) -> bool {
        match self {
            Self::All => true,
            Self::Normal => matches!(level, LogLevel::Normal),
            Self::Error => matches!(level, LogLevel::Error),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => ALL,
            Self::Normal => "normal",
            Self::Error => "error",
        }
    }
}

impl FromStr for LevelFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ALL => Ok(Self::All),
            "normal" => Ok(Self::Normal),
            "error" => Ok(Self::Error),
            _ => Err(CoreError::InvalidLevelFilter(s.to_string())),
        }
    }
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current source × level selection of the log view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub source: SourceFilter,
    #[serde(default)]
    pub level: LevelFilter,
}

impl FilterSelection {
    #[must_use]
    pub fn new(source: impl Into<SourceFilter>, level: LevelFilter) -> Self {
        Self {
            source: source.into(),
            level,
        }
    }
}

/// Whether `event` belongs in the view of `active_project` under
/// `selection`. Pure: identical inputs always give identical answers.
#[must_use]
pub fn is_visible(
    event: &LogEvent,
    selection: &FilterSelection,
    active_project: &ProjectId,
) -> bool {
    if event.project_id != *active_project {
        return false;
    }
    if !selection.source.matches(&event.source) {
        return false;
    }
    selection.level.matches(event.level)
}
