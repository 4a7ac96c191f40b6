//! Error type definitions.
//!
//! Callers of the supervisor need to tell failure classes apart (a start on a
//! running channel is handled very differently from a missing render device),
//! so every error carries a stable [`ErrorKind`].

use thiserror::Error;
use uuid::Uuid;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Stable classification of supervisor errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel record is missing required fields or carries an invalid value.
    Validation,
    /// Channel id unknown.
    NotFound,
    /// Operation conflicts with the channel's current state.
    Conflict,
    /// A required device or file is missing or unreadable.
    Resource,
    /// The OS refused to create the child process.
    Spawn,
    /// Unexpected store or I/O failure.
    Internal,
}

/// Top-level error type for supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("channel not found: {id}")]
    NotFound { id: Uuid },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("resource unavailable: {message}")]
    Resource { message: String },

    #[error("failed to spawn encoder: {message}")]
    Spawn { message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SupervisorError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(id: Uuid) -> Self {
        Self::NotFound { id }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    pub fn spawn<S: Into<String>>(message: S) -> Self {
        Self::Spawn {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinguishable() {
        assert_eq!(
            SupervisorError::validation("missing name").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SupervisorError::not_found(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SupervisorError::conflict("already running").kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SupervisorError::resource("no render device").kind(),
            ErrorKind::Resource
        );
        assert_eq!(SupervisorError::spawn("enoent").kind(), ErrorKind::Spawn);
        assert_eq!(
            SupervisorError::internal("oops").kind(),
            ErrorKind::Internal
        );
    }
}
