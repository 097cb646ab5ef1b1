//! Error types for the preprint forge.
//!
//! Two layers: [`ForgeError`] aborts a whole run (naming, persistence,
//! malformed input), while [`AdapterError`] is caught at the stage boundary
//! and recorded on the stage instead of propagating.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::{StageName, StageStatus};

/// Result alias for run-level operations.
pub type ForgeResult<T> = Result<T, ForgeError>;

/// The main error type for forge operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// An explicitly requested slug is already registered.
    #[error("Name conflict: slug '{slug}' is already taken")]
    NameConflict {
        /// The conflicting slug.
        slug: String,
    },

    /// No free slug could be found for a topic.
    #[error("Name space exhausted for '{base}' after {attempts} attempts")]
    NameSpaceExhausted {
        /// The base slug that kept colliding.
        base: String,
        /// How many candidates were tried.
        attempts: usize,
    },

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No run state exists for the slug.
    #[error("Project not found: {slug}")]
    ProjectNotFound {
        /// The missing slug.
        slug: String,
    },

    /// Another run currently owns the slug.
    #[error("A run is already in progress for '{slug}'")]
    RunInProgress {
        /// The busy slug.
        slug: String,
    },

    /// Reading or writing durable state failed.
    #[error("Persistence error at {}: {message}", path.display())]
    Persistence {
        /// The file involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A stage was asked to move backwards or sideways in its state machine.
    #[error("Invalid transition for stage '{stage}': {from} -> {to}")]
    InvalidTransition {
        /// The stage.
        stage: StageName,
        /// Current status.
        from: StageStatus,
        /// Requested status.
        to: StageStatus,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Creates a persistence error for a path.
    pub fn persistence(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if the error is a persistence failure.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let kind = match self {
            Self::NameConflict { .. } => "NameConflict",
            Self::NameSpaceExhausted { .. } => "NameSpaceExhausted",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::ProjectNotFound { .. } => "ProjectNotFound",
            Self::RunInProgress { .. } => "RunInProgress",
            Self::Persistence { .. } => "PersistenceError",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Config(_) => "ConfigError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        };
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// What kind of failure an adapter hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The call did not finish in time.
    Timeout,
    /// The remote side throttled us.
    RateLimited,
    /// 5xx-class unavailability.
    Unavailable,
    /// Connection-level failure.
    Network,
    /// The input was rejected.
    InvalidInput,
    /// Credentials missing or refused.
    Unauthorized,
    /// A required remote resource or local tool does not exist.
    NotFound,
    /// The run was cancelled while the call was in flight.
    Cancelled,
    /// Anything else.
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Network => "network",
            Self::InvalidInput => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Retry classification of an adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retryable and potentially recoverable.
    Transient,
    /// Definitively non-recoverable for this run.
    Permanent,
}

/// A failure reported by a stage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct AdapterError {
    /// The failure category.
    pub category: ErrorCategory,
    /// Human readable description.
    pub message: String,
}

impl AdapterError {
    /// Creates a new adapter error.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Timed out.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Rate limited.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::RateLimited, message)
    }

    /// Remote unavailable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unavailable, message)
    }

    /// Connection failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, message)
    }

    /// Rejected input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidInput, message)
    }

    /// Authentication failure.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unauthorized, message)
    }

    /// Missing resource or tool.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// Cancelled mid-call.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, reason)
    }

    /// Uncategorised failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Other, message)
    }

    /// Maps an HTTP status code onto a category.
    #[must_use]
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let category = match status {
            408 => ErrorCategory::Timeout,
            429 => ErrorCategory::RateLimited,
            401 | 403 => ErrorCategory::Unauthorized,
            404 => ErrorCategory::NotFound,
            400..=499 => ErrorCategory::InvalidInput,
            500..=599 => ErrorCategory::Unavailable,
            _ => ErrorCategory::Other,
        };
        Self::new(category, message)
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        let category = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCategory::NotFound,
            std::io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            std::io::ErrorKind::PermissionDenied => ErrorCategory::Unauthorized,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => ErrorCategory::Network,
            _ => ErrorCategory::Other,
        };
        Self::new(category, err.to_string())
    }
}
