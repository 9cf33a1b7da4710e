//! Error types for hfbr
//!
//! Failures fall in three scopes. Configuration errors (bad granularity, bad
//! duration, unknown plan) are raised while the settings are loaded and stop
//! the process before any target runs. Target errors (unreadable target,
//! inaccessible backup directory) abort one target's pass and nothing else.
//! Per-file deletion failures are never returned at all: they are reported
//! through the event sink and recorded in the prune report.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the hfbr library
pub type Result<T> = std::result::Result<T, HfbrError>;

/// Main error type for all hfbr operations
#[derive(Debug, Error)]
pub enum HfbrError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors while parsing the JSON settings file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The target file could not be opened or read
    #[error("Target unreadable: {path:?}: {source}")]
    TargetUnreadable {
        /// Path of the target file
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The backup directory or one of its snapshots could not be inspected
    #[error("Cannot access snapshot catalog at {path:?}: {source}")]
    CatalogAccess {
        /// Directory or snapshot path that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Granularity token that is neither a duration, `month`, `year` nor null
    #[error("Unknown granularity: {0:?}")]
    UnknownGranularity(String),

    /// Duration string that does not parse or is zero
    #[error("Invalid duration: {0:?}. Expected format like '1 week', '5 days', '1 hour'")]
    InvalidDuration(String),

    /// A target references a plan name that is not defined
    #[error("Unknown retention plan: {0:?}")]
    UnknownPlan(String),

    /// A target with neither a target path nor a backup directory
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Nothing configured and nothing supplied on the command line
    #[error("Nothing to do! No target in settings and none given on the command line")]
    NoUsableTargets,

    /// Compression stream errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression stream errors
    #[error("Decompression error: {0}")]
    Decompression(String),
}

impl HfbrError {
    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        HfbrError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        HfbrError::Decompression(msg.into())
    }

    /// Check if this error comes from invalid configuration.
    ///
    /// Configuration errors must stop the process before any target runs.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HfbrError::Json(_)
                | HfbrError::UnknownGranularity(_)
                | HfbrError::InvalidDuration(_)
                | HfbrError::UnknownPlan(_)
                | HfbrError::NoUsableTargets
        )
    }

    /// Check if this error is confined to a single target
    pub fn is_target_scoped(&self) -> bool {
        matches!(
            self,
            HfbrError::TargetUnreadable { .. }
                | HfbrError::CatalogAccess { .. }
                | HfbrError::InvalidTarget(_)
        )
    }
}
