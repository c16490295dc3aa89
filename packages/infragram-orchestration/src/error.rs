use infragram_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A step's own logic failed; the message is surfaced verbatim
    #[error("{0}")]
    Step(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Step not registered: {0}")]
    StepNotRegistered(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn step<E: std::fmt::Display>(e: E) -> Self {
        Self::Step(e.to_string())
    }

    pub fn configuration<E: std::fmt::Display>(e: E) -> Self {
        Self::Configuration(e.to_string())
    }

    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Storage(_) | OrchestratorError::Io(_) => ErrorCategory::Storage,
            OrchestratorError::Configuration(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::StepNotRegistered(_) => ErrorCategory::Configuration,
            OrchestratorError::MissingDependency(_) => ErrorCategory::Dependency,
            OrchestratorError::Step(_)
            | OrchestratorError::InvalidStateTransition { .. }
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Other(_) => ErrorCategory::Step,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

/// Error category used in logs and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Persistence I/O failure
    Storage,
    /// A step's internal logic failed (parse/enhance/layout/generate)
    Step,
    /// Missing credential, invalid override-file naming, bad config
    Configuration,
    /// A required upstream artifact is absent
    Dependency,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Storage => "storage",
            ErrorCategory::Step => "step",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Dependency => "dependency",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "storage" => Ok(ErrorCategory::Storage),
            "step" => Ok(ErrorCategory::Step),
            "configuration" => Ok(ErrorCategory::Configuration),
            "dependency" => Ok(ErrorCategory::Dependency),
            _ => Err(OrchestratorError::configuration(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Storage,
            ErrorCategory::Step,
            ErrorCategory::Configuration,
            ErrorCategory::Dependency,
        ] {
            let s = category.as_str();
            let parsed = ErrorCategory::from_str(s).unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!(ErrorCategory::from_str("invalid").is_err());
    }

    #[test]
    fn test_step_error_is_verbatim() {
        let err = OrchestratorError::step("invalid syntax");
        assert_eq!(err.to_string(), "invalid syntax");
        assert_eq!(err.category(), ErrorCategory::Step);
    }

    #[test]
    fn test_storage_error_category() {
        let err: OrchestratorError = StorageError::io("disk full").into();
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.to_string(), "[io] disk full");
    }

    #[test]
    fn test_missing_dependency_category() {
        let err = OrchestratorError::MissingDependency("parsed-graph.json".to_string());
        assert_eq!(err.category(), ErrorCategory::Dependency);
    }
}
