//! Error types for infragram-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Filesystem errors (disk full, permission denied, ...)
    IO,
    /// Serialization/deserialization errors
    Serialization,
    /// Run id already reserved, or its location already holds a run
    Conflict,
    /// Identifier is not usable as a directory name
    InvalidId,
    /// Run not found
    RunNotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IO => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidId => "invalid_id",
            ErrorKind::RunNotFound => "run_not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IO, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn conflict(project: &str, run_id: &str) -> Self {
        Self::new(
            ErrorKind::Conflict,
            format!("Run id already in use: {}/{}", project, run_id),
        )
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidId,
            format!("Not a filesystem-safe identifier: {:?}", id.into()),
        )
    }

    pub fn run_not_found(project: &str, run_id: &str) -> Self {
        Self::new(
            ErrorKind::RunNotFound,
            format!("Run not found: {}/{}", project, run_id),
        )
    }

    /// Wrap an I/O error with the path or operation it happened on
    pub fn from_io(context: impl fmt::Display, err: std::io::Error) -> Self {
        StorageError::io(format!("{}: {}", context, err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io(format!("IO error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
