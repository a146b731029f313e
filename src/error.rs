//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type. Failures that must
//! never change the outcome of a request (cache IO, permission hardening) are
//! reported through [`BestEffort`] instead.

use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// How a failure is reported to an external caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller sent something we refuse to run (HTTP 400)
    BadInput,
    /// Building or running the program failed (HTTP 500)
    Execution,
}

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Request validation
    #[error("Source text is empty")]
    EmptySource,

    #[error("Source text is too large: {size} bytes (maximum {max})")]
    SourceTooLarge { size: usize, max: usize },

    #[error("Invalid timeout: {0} seconds (must be greater than 0 and at most {1})")]
    InvalidTimeout(f64, f64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Source text contains a forbidden pattern: {pattern}")]
    ForbiddenPattern { pattern: String },

    #[error("Failed to decode output: the program produced no readable stdout")]
    NoOutput,

    // Pipeline failures
    #[error("Build failed:\n{output}")]
    Build { output: String },

    #[error("Program exited with code {code}:\n{stderr}")]
    Runtime { code: i32, stderr: String },

    #[error("{stage} timed out after {seconds:.1}s")]
    Timeout { stage: String, seconds: f64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Failed to create workspace {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dependency template build failed: {0}")]
    TemplateBuild(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a timeout error for a pipeline stage
    pub fn timeout(stage: impl Into<String>, seconds: f64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            seconds,
        }
    }

    /// Whether the caller's input is at fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptySource
                | Self::SourceTooLarge { .. }
                | Self::InvalidTimeout(..)
                | Self::InvalidRequest(_)
                | Self::ForbiddenPattern { .. }
                | Self::NoOutput
        )
    }

    /// Status category for transports
    pub fn category(&self) -> ErrorCategory {
        if self.is_validation() {
            ErrorCategory::BadInput
        } else {
            ErrorCategory::Execution
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } => Some("Increase the timeout or simplify the script"),
            Self::SourceTooLarge { .. } => Some("Split the script into smaller pieces"),
            Self::ForbiddenPattern { .. } => {
                Some("Process spawning and raw OS access are not allowed in scripts")
            }
            Self::TemplateBuild(_) => Some("Run: kiln template clear && kiln template warm -v"),
            Self::ConfigInvalid { .. } => Some("Run: kiln config init --force"),
            _ => None,
        }
    }
}

/// Outcome of an operation whose failure must not affect the caller.
///
/// The value is always usable; `warning` carries the diagnostic of whatever
/// went wrong along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct BestEffort<T = ()> {
    pub value: T,
    pub warning: Option<String>,
}

impl<T> BestEffort<T> {
    /// A clean outcome
    pub fn ok(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    /// An outcome with a diagnostic attached
    pub fn degraded(value: T, warning: impl Into<String>) -> Self {
        Self {
            value,
            warning: Some(warning.into()),
        }
    }

    /// Log the warning, if any, and hand back the value
    pub fn log(self, operation: &str) -> T {
        if let Some(ref warning) = self.warning {
            warn!(operation, "{}", warning);
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KilnError::SourceTooLarge {
            size: 100_001,
            max: 100_000,
        };
        assert!(err.to_string().contains("100001 bytes"));

        let err = KilnError::timeout("run", 1.5);
        assert_eq!(err.to_string(), "run timed out after 1.5s");
    }

    #[test]
    fn error_category() {
        assert_eq!(KilnError::EmptySource.category(), ErrorCategory::BadInput);
        assert_eq!(KilnError::NoOutput.category(), ErrorCategory::BadInput);
        assert_eq!(
            KilnError::ForbiddenPattern {
                pattern: "system(".to_string()
            }
            .category(),
            ErrorCategory::BadInput
        );
        assert_eq!(
            KilnError::Build {
                output: String::new()
            }
            .category(),
            ErrorCategory::Execution
        );
        assert_eq!(KilnError::timeout("build", 1.0).category(), ErrorCategory::Execution);
    }

    #[test]
    fn error_hint() {
        assert!(KilnError::timeout("run", 2.0).hint().is_some());
        assert_eq!(KilnError::EmptySource.hint(), None);
    }

    #[test]
    fn best_effort_log_returns_value() {
        assert_eq!(BestEffort::ok(3).log("test"), 3);
        let degraded = BestEffort::degraded(Some("x"), "disk full");
        assert_eq!(degraded.warning.as_deref(), Some("disk full"));
        assert_eq!(degraded.log("test"), Some("x"));
    }
}
