//! Error types for the NetBox manager.
//!
//! This module provides the error hierarchy for every step of a
//! reconciliation: settings, compose documents, Docker commands,
//! provisioning, and the reconciler state machine itself.

use std::path::PathBuf;
use thiserror::Error;

use crate::reconciler::ReconcileStage;

/// The main error type for the NetBox manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Settings file and validation errors.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Compose document errors.
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    /// Docker CLI errors.
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// Provisioning errors.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settings file errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A line is not a comment, blank, or `KEY=VALUE`.
    #[error("{path}:{line}: malformed settings line: {content:?}")]
    MalformedLine {
        /// Path to the settings file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// The offending line.
        content: String,
    },

    /// A known key carries a value of the wrong type.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Settings key.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Validation failed.
    #[error("Settings validation failed: {message}")]
    Validation {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The settings or lock file could not be parsed.
    #[error("Settings file is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("Settings serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// Writing the settings file failed.
    #[error("Failed to write settings: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another run holds the lock.
    #[error("Another run holds the lock (holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Compose document errors.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The base document owned by netbox-docker is missing.
    #[error("Base compose document not found: {path}")]
    MissingBaseDocument {
        /// Expected location.
        path: PathBuf,
    },

    /// Fetching the upstream document failed.
    #[error("Failed to fetch {url}: {message}")]
    FetchFailed {
        /// Requested URL.
        url: String,
        /// Transport or HTTP error.
        message: String,
    },

    /// The fetched upstream document is not usable.
    #[error("Upstream document from {url} is invalid: {message}")]
    UpstreamInvalid {
        /// Source URL.
        url: String,
        /// What was wrong with it.
        message: String,
    },

    /// A document could not be rendered.
    #[error("Failed to render {document}: {message}")]
    Render {
        /// Document being rendered.
        document: String,
        /// Serializer error.
        message: String,
    },

    /// Compose rejected the layered document set.
    #[error("Compose rejected the document set (last written: {document}): {message}")]
    ResolutionFailed {
        /// The document identified as the offender.
        document: PathBuf,
        /// Compose diagnostic.
        message: String,
    },
}

/// Docker and Compose CLI errors.
#[derive(Debug, Error)]
pub enum DockerError {
    /// The command ran and exited non-zero.
    #[error("'{command}' failed (exit code {}): {stderr}", .exit_code.map_or_else(|| String::from("none"), |c| c.to_string()))]
    CommandFailed {
        /// Full command line.
        command: String,
        /// Captured standard error.
        stderr: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The binary could not be started.
    #[error("Failed to execute '{command}': {message}")]
    ExecFailed {
        /// Full command line.
        command: String,
        /// OS error.
        message: String,
    },

    /// The command did not finish in time.
    #[error("Timed out running '{command}' after {timeout_secs}s")]
    Timeout {
        /// Full command line.
        command: String,
        /// Timeout in seconds.
        timeout_secs: u64,
    },

    /// Neither Compose flavour is installed.
    #[error("Neither 'docker compose' nor 'docker-compose' is available")]
    ComposeUnavailable,

    /// Command output could not be interpreted.
    #[error("Unexpected output from '{command}': {message}")]
    UnexpectedOutput {
        /// Full command line.
        command: String,
        /// Parse error.
        message: String,
    },
}

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// HTTP client construction or request failure.
    #[error("HTTP error: {message}")]
    Http {
        /// Description of the failure.
        message: String,
    },

    /// An administrative script reported failure.
    #[error("Administrative script '{script}' failed: {message}")]
    AdminScriptFailed {
        /// Script name.
        script: &'static str,
        /// Captured diagnostic.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A step failed; the sequence halted there.
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        /// Stage that was being entered.
        step: ReconcileStage,
        /// Underlying error.
        source: Box<ManagerError>,
    },

    /// Reconciliation was aborted before it started.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for NetBox manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

impl ManagerError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the failure means "not ready yet" rather than "broken".
    ///
    /// The reconciler turns these into warnings and keeps going.
    #[must_use]
    pub const fn is_deferrable(&self) -> bool {
        matches!(
            self,
            Self::Docker(DockerError::CommandFailed { .. } | DockerError::Timeout { .. })
                | Self::Provision(ProvisionError::AdminScriptFailed { .. })
        )
    }

    /// Returns the failed stage when this is a step failure.
    #[must_use]
    pub const fn failed_step(&self) -> Option<ReconcileStage> {
        match self {
            Self::Reconcile(ReconcileError::StepFailed { step, .. }) => Some(*step),
            _ => None,
        }
    }
}

impl SettingsError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl DockerError {
    /// Creates a command-failed error from captured output.
    #[must_use]
    pub fn failed(command: impl Into<String>, stderr: &str, exit_code: Option<i32>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            stderr: stderr.trim().to_string(),
            exit_code,
        }
    }

    /// Creates an exec-failed error.
    #[must_use]
    pub fn exec_failed(command: impl Into<String>, err: &std::io::Error) -> Self {
        Self::ExecFailed {
            command: command.into(),
            message: err.to_string(),
        }
    }
}

impl ProvisionError {
    /// Creates an HTTP error.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }
}

impl ReconcileError {
    /// Wraps an error as a failure of the given stage.
    #[must_use]
    pub fn step(step: ReconcileStage, source: ManagerError) -> Self {
        Self::StepFailed {
            step,
            source: Box::new(source),
        }
    }
}
