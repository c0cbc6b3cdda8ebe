//! Error types for fastcrud.
//!
//! All errors are strongly typed using thiserror. Backends and the
//! dispatcher share [`CrudError`], so a storage failure reaches the HTTP
//! layer exactly as the backend raised it.

use thiserror::Error;

use crate::model::RecordId;

/// Validation errors raised before anything is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown storage option '{key}'")]
    UnknownOption {
        key: String,
    },

    #[error("Invalid value '{value}' for storage option '{key}': {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid record: {reason}")]
    InvalidRecord {
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid query string: {reason}")]
    InvalidQuery {
        reason: String,
    },
}

/// Top-level error type for CRUD operations.
#[derive(Debug, Error)]
pub enum CrudError {
    #[error("Record not found: {id}")]
    NotFound {
        id: RecordId,
    },

    #[error("Record already exists: {id}")]
    Conflict {
        id: RecordId,
    },

    #[error("Invalid filter operator: {operator}")]
    InvalidOperator {
        operator: String,
    },

    #[error("Storage backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

impl CrudError {
    /// Creates a backend-unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid-operator error.
    #[must_use]
    pub fn invalid_operator(operator: impl Into<String>) -> Self {
        Self::InvalidOperator {
            operator: operator.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub const fn is_invalid_operator(&self) -> bool {
        matches!(self, Self::InvalidOperator { .. })
    }

    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error may go away on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        // Everything else is a property of the request or of the stored data.
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidOperator { .. } => "invalid_operator",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Validation(_) => "validation",
            Self::Serialization { .. } => "serialization",
        }
    }
}

impl From<serde_json::Error> for CrudError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for CRUD operations.
pub type CrudResult<T> = Result<T, CrudError>;
