//! Error types for the tutor orchestrator.
//!
//! The taxonomy mirrors how failures travel through a walk: routing errors
//! are settled at the router, capability errors are captured at the failing
//! node, and collaborator outages surface to the capability that called the
//! collaborator, which decides between a fallback and a capability error.

use std::path::PathBuf;

/// A specialized `Result` type for orchestrator operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving learner interactions.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Walk Errors
    // ========================================================================
    /// The request type is outside the supported set.
    #[error("Unknown request type: {request_type}\n\nSuggestion: Use one of the documented request types (e.g. 'get_schedule')")]
    RoutingError {
        /// The request type as received.
        request_type: String,
    },

    /// A capability node failed while processing the interaction.
    #[error("Capability '{node}' failed: {message}")]
    CapabilityError {
        /// Name of the failing node.
        node: String,
        /// Description of the failure.
        message: String,
    },

    /// A node did not finish within its time budget.
    #[error("Capability '{node}' timed out after {timeout_secs}s\n\nSuggestion: Check the health of external services or raise nodeTimeoutSeconds")]
    NodeTimeout {
        /// Name of the node that timed out.
        node: String,
        /// The timeout in seconds.
        timeout_secs: u64,
    },

    /// The interaction was cancelled before the node finished.
    #[error("Interaction cancelled while running '{node}'")]
    Cancelled {
        /// Name of the node that was interrupted.
        node: String,
    },

    /// The activity input is missing a field or has the wrong shape.
    #[error("Invalid activity input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// An external collaborator could not serve the request.
    #[error("{service} service unavailable: {message}")]
    CollaboratorUnavailable {
        /// Which collaborator failed.
        service: ServiceKind,
        /// Description of the failure.
        message: String,
    },

    /// A requested record does not exist.
    #[error("{kind} not found: '{id}'")]
    NotFound {
        /// What kind of record was requested.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Data snapshot contains malformed JSON that cannot be loaded.
    #[error("Corrupted data file '{path}': {message}\n\nSuggestion: Remove the data file to start fresh, or restore from backup")]
    DataFileCorrupted {
        /// Path to the corrupted data file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// External collaborators the core depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Learner, review-item and schedule storage.
    Persistence,
    /// Generative exercise and evaluation content.
    Content,
    /// Speech synthesis, recognition and pronunciation scoring.
    Speech,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence => write!(f, "persistence"),
            Self::Content => write!(f, "content"),
            Self::Speech => write!(f, "speech"),
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `RoutingError`.
    #[must_use]
    pub fn routing(request_type: impl Into<String>) -> Self {
        Self::RoutingError {
            request_type: request_type.into(),
        }
    }

    /// Creates a new `CapabilityError`.
    #[must_use]
    pub fn capability(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapabilityError {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `CollaboratorUnavailable` error.
    #[must_use]
    pub fn unavailable(service: ServiceKind, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            service,
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a new `DataFileCorrupted` error.
    #[must_use]
    pub fn data_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DataFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and may be retried by the caller.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorUnavailable { .. } | Self::NodeTimeout { .. }
        )
    }

    /// Returns `true` if this error prevents the service from starting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::DataFileCorrupted { .. }
        )
    }
}
