//! Error types for the recording pipeline.

use thiserror::Error;

use crate::session::SessionState;

/// Failure of the durable store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: String, expected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to acquire or drive a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    Unavailable(String),

    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Classify a spawn/open failure the way a capture request reports it.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                CaptureError::Unavailable(format!("{}: {}", program, err))
            }
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{}: {}", program, err))
            }
            _ => CaptureError::Io(err),
        }
    }
}

/// Failure surfaced by the session controller.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("a session is already in progress ({0})")]
    SessionAlreadyActive(SessionState),

    #[error("no session is recording ({0})")]
    NotRecording(SessionState),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to commit recording: {0}")]
    Commit(#[source] StorageError),
}

/// Failure of a catalog operation.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("recording {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to load or validate a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
