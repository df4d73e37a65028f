//! Centralized error types for mailtriage.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailtriage library.
#[derive(Error, Debug)]
pub enum TriageError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mailbox path does not exist.
    #[error("Mailbox not found: {0}")]
    MailboxNotFound(PathBuf),

    /// The mail store rejected a folder or item operation.
    #[error("Mail store error: {0}")]
    Store(String),

    /// A single mail item has a missing or unreadable property.
    #[error("Malformed item '{key}': {reason}")]
    MalformedItem { key: String, reason: String },

    /// The dataset file could not be opened or parsed.
    #[error("Could not load dataset '{path}': {reason}")]
    DatasetLoad { path: PathBuf, reason: String },

    /// The dataset parsed but holds no rows.
    #[error("Dataset '{0}' contains no records")]
    EmptyDataset(PathBuf),

    /// Every row carries the same target, so there is nothing to separate.
    #[error("Dataset contains a single target class ({count} rows of class {class})")]
    SingleClass { class: u8, count: usize },

    /// The model artifact does not exist.
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    /// The model artifact is corrupt or was written by an incompatible version.
    #[error("Corrupt or incompatible model '{path}': {reason}")]
    InvalidModel { path: PathBuf, reason: String },

    /// The model was trained on a different feature layout.
    #[error("Feature schema mismatch: model expects {expected}, pipeline produces {found}")]
    SchemaMismatch { expected: String, found: String },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, TriageError>`.
pub type Result<T> = std::result::Result<T, TriageError>;

impl TriageError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `MalformedItem` variant.
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedItem {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `TriageError::io`).
impl From<std::io::Error> for TriageError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
