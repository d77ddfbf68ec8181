//! Error types for gp-bench
//!
//! Setup and storage failures are fatal and surface to the user with the
//! failing step named. Per-configuration evaluation failures are not errors
//! at this level; they are recorded as data (see [`crate::runner::EvaluationError`]).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gp-bench error types
#[derive(Error, Debug)]
pub enum Error {
    /// A setup step (provisioning or fetching) failed
    #[error("Setup failed at step `{step}`: {message}")]
    Setup {
        /// Name of the failing step, e.g. `clone:deap`
        step: String,
        /// What went wrong, usually the tail of the command's stderr
        message: String,
    },

    /// Package manager executable is not available
    #[error("Package manager `{0}` not found\nInstall it or activate it in this shell, then re-run setup")]
    PackageManagerMissing(String),

    /// Environment already exists and the policy forbids reusing it
    #[error("Environment `{0}` already exists\nSet `on_existing: reuse` or `recreate` to proceed")]
    EnvironmentExists(String),

    /// A file replacement source does not exist
    #[error("Patch source not found: {}", .0.display())]
    MissingPatchSource(PathBuf),

    /// Results could not be written or read
    #[error("Storage error: {0}")]
    Storage(String),

    /// Attempt to overwrite an existing record (the store is append-only)
    #[error("Result already recorded at {}\nUse a new session to re-run", .0.display())]
    AlreadyRecorded(PathBuf),

    /// Configuration file is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Environment or third-party fetch failure
    Setup,
    /// Results store failure
    Storage,
    /// Invalid configuration
    Config,
    /// Anything else
    Other,
}

impl Error {
    /// Shorthand for [`Error::Setup`].
    pub fn setup(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Classify the error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Setup { .. }
            | Self::PackageManagerMissing(_)
            | Self::EnvironmentExists(_)
            | Self::MissingPatchSource(_) => ErrorCategory::Setup,
            Self::Storage(_) | Self::AlreadyRecorded(_) => ErrorCategory::Storage,
            Self::Config(_) | Self::Yaml(_) => ErrorCategory::Config,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// True for errors raised while provisioning or fetching.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self.category(), ErrorCategory::Setup)
    }
}
