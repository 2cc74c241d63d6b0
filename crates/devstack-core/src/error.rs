//! Error types for the devstack console.

use thiserror::Error;

/// Result type alias for devstack core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for devstack core operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    #[error("Invalid service key: {0:?}. Must be \"<project_id>:<service_id>\"")]
    InvalidServiceKey(String),

    #[error("Invalid level filter: {0:?}. Expected all, normal or error")]
    InvalidLevelFilter(String),

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable category, used in structured log fields.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidServiceKey(_) | Self::InvalidLevelFilter(_) => "INVALID_ARGUMENT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
