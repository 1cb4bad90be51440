//! Error types for the ccml-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to look up a dotted path in the object registry.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("module not found: {module} (while resolving {path})")]
    ModuleNotFound { module: String, path: String },

    #[error("attribute not found: {member} in module {module} (while resolving {path})")]
    AttributeNotFound {
        module: String,
        member: String,
        path: String,
    },

    #[error("{path} is not constructible")]
    NotConstructible { path: String },
}

impl ResolutionError {
    /// The dotted path whose resolution failed.
    pub fn path(&self) -> &str {
        match self {
            Self::ModuleNotFound { path, .. }
            | Self::AttributeNotFound { path, .. }
            | Self::NotConstructible { path } => path,
        }
    }
}

/// Top-level error type for ccml operations.
#[derive(Debug, Error)]
pub enum CcmlError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("No git hash available: folder seems to be no git repo: {}", path.display())]
    NoGitHashAvailable { path: PathBuf },

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl CcmlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn prediction(msg: impl Into<String>) -> Self {
        Self::Prediction(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn no_git_hash(path: impl Into<PathBuf>) -> Self {
        Self::NoGitHashAvailable { path: path.into() }
    }

    /// Whether this error is a configuration defect on the caller's side.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T, E = CcmlError> = std::result::Result<T, E>;
